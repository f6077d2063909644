pub mod http;
pub mod local;

pub use http::HttpDocumentStore;
pub use local::LocalDocumentStore;
