//! Reliable bulk transfer over UDP between a workstation and the robot.
//!
//! A session starts with a SYN exchange that selects the direction (photo
//! download or firmware upload) and assigns a connection id, moves the
//! payload in 255-byte segments under a 7-segment window with cumulative
//! acknowledgments, and ends with a FIN exchange.
//!
//! No payload checksum exists above the one UDP carries; adding one would
//! break compatibility with the device.

pub mod error;
pub mod io;
pub mod protocol;

pub use error::{Error, Result};
pub use protocol::config::Config;
pub use protocol::connection::{Link, TransferStats};
pub use protocol::packets::{Command, Flag, Packet};
pub use protocol::transport::{CancelToken, Transport};
pub use protocol::{run_download, run_upload, Protocol, DEVICE_PORT};
