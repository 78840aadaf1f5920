mod format;

pub use format::{print_error, print_info, print_json, print_success, OutputMode};
