pub mod session;
pub mod upload;

pub use session::{PrinterSession, SessionSnapshot};
pub use upload::{HttpUploader, Uploader};
