//! Camera stream input
//!
//! URL validation, the MJPEG-over-HTTP transport and the decode task that
//! feeds frames to observers.

pub mod mjpeg;
pub mod source;
pub mod traits;
pub mod url;

pub use mjpeg::{HttpConnector, MjpegParser};
pub use source::{ObserverGuard, ObserverRegistry, StreamHandle, StreamSource};
pub use traits::{Connector, FrameObserver, FrameReader};
pub use url::StreamUrl;
