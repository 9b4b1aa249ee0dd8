mod callback;
mod data;
mod schedule;
mod trainer;

pub use callback::EpochCallback;
pub use data::{FeatureData, TrainingData};
pub use schedule::LearningRateSchedule;
pub use trainer::{
    FeatureDistance, RatioTrainer, TrainerRequest, TrainingResult, Verbosity,
};
