pub mod activations;
pub mod layers;
pub mod loss;
mod ratio_model;
mod sequential;
mod state_dict;

pub use ratio_model::RatioModel;
pub use sequential::Sequential;
pub use state_dict::PersistentModel;
