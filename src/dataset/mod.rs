pub mod scanner;
pub mod split;

pub use scanner::{is_supported_image, scan_dataset, scan_images, IMAGE_EXTENSIONS};
pub use split::{train_test_split, DEFAULT_SEED, DEFAULT_TEST_FRACTION};
