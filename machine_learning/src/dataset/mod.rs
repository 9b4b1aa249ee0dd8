mod loader;

pub use loader::{
    ArraySource, DEFAULT_MEMMAP_THRESHOLD_GB, into_matrix, into_vector, load_and_check,
};
