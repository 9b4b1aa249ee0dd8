mod adam;
mod factory;
mod gradient_descent;
mod optimizer;

pub use adam::Adam;
pub use factory::{OptimizerKind, OptimizerKwargs, get_optimizer};
pub use gradient_descent::GradientDescent;
pub use optimizer::Optimizer;
