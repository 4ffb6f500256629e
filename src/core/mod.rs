//! Core data types and I/O operations.

pub mod loaders;
pub mod table;
pub mod writers;

pub use loaders::{fov_name_from_path, list_fov_files, load_fov_csv, LoaderError, SchemaMode};
pub use table::{FovTable, TableError};
pub use writers::{write_fov_csv, write_fov_to_dir, write_summary_csv, WriteError};
