// file: src/download/mod.rs
// description: source retrieval with pluggable fetch strategies
// reference: internal module structure

pub mod downloader;
pub mod fetchers;
pub mod registry;

pub use downloader::{Downloader, RetryPolicy, adopt_file, find_existing_file};
pub use fetchers::{AuthContext, ByteStream, FetchResponse, HttpFetcher, LocalFetcher, SourceFetcher};
pub use registry::FetcherRegistry;
