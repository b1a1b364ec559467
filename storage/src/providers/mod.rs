pub mod aws;
pub mod dropbox;
pub mod local;

pub use aws::S3Provider;
pub use dropbox::DropboxProvider;
pub use local::LocalProvider;
