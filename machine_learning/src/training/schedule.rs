/// Exponential learning rate decay from `initial_lr` on the first epoch to `final_lr` on the
/// last one.
#[derive(Debug, Clone, Copy)]
pub struct LearningRateSchedule {
    initial_lr: f32,
    final_lr: f32,
    epochs: usize,
}

impl LearningRateSchedule {
    pub fn new(initial_lr: f32, final_lr: f32, epochs: usize) -> Self {
        Self {
            initial_lr,
            final_lr,
            epochs,
        }
    }

    /// Returns the learning rate of the zero based `epoch`.
    #[inline]
    pub fn learning_rate(&self, epoch: usize) -> f32 {
        if self.epochs <= 1 {
            return self.initial_lr;
        }

        let progress = epoch.min(self.epochs - 1) as f32 / (self.epochs - 1) as f32;
        self.initial_lr * (self.final_lr / self.initial_lr).powf(progress)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn decays_between_the_bounds() {
        let s = LearningRateSchedule::new(1e-3, 1e-4, 3);

        assert_relative_eq!(s.learning_rate(0), 1e-3);
        assert_relative_eq!(s.learning_rate(1), 1e-3 * 0.1f32.sqrt(), max_relative = 1e-5);
        assert_relative_eq!(s.learning_rate(2), 1e-4, max_relative = 1e-5);
        assert_relative_eq!(s.learning_rate(7), 1e-4, max_relative = 1e-5);
    }

    #[test]
    fn single_epoch_uses_the_initial_rate() {
        assert_eq!(LearningRateSchedule::new(0.5, 0.1, 1).learning_rate(0), 0.5);
    }
}
