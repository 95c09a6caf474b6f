pub mod app_config;
pub mod artifact;
pub mod command;
pub mod compress;
pub mod file_ext;
pub mod finish;
pub mod redacted;
pub mod result_error;
pub mod retention;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod task;
pub mod validate;
pub mod version;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
