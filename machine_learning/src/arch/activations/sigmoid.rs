/// The logistic function.
#[derive(Clone, Debug, Default)]
pub struct Sigmoid;

impl Sigmoid {
    pub fn new() -> Self {
        Self
    }

    /// Evaluated on `-|z|` and mirrored so `exp` never overflows.
    pub fn f(&self, z: f32) -> f32 {
        let e = (-z.abs()).exp();
        if z >= 0. { 1. / (1. + e) } else { e / (1. + e) }
    }

    pub fn df(&self, z: f32) -> f32 {
        let s = self.f(z);
        s * (1. - s)
    }
}
