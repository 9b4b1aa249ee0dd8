mod augmented_xe;
mod component;
mod factory;
mod loss_fn;
mod ratio_mse;
mod ratio_xe;
mod score_mse;

pub use augmented_xe::AugmentedXe;
pub use component::{LossComponent, LossType};
pub use factory::{Method, ResolvedLoss, get_loss};
pub use loss_fn::{LossFn, Targets};
pub use ratio_mse::RatioMse;
pub use ratio_xe::RatioXe;
pub use score_mse::ScoreMse;
