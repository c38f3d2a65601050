//! RTSP-style framing for the Wi-Fi Display control connection.
//!
//! WFD endpoints speak an RTSP-family protocol over a TCP link: CRLF
//! header lines, an empty line, then an optional `Content-Length` body.
//! [`Decoder`] turns an arbitrarily-chunked byte stream into whole
//! [`Message`]s, [`Control`] drives the non-blocking socket underneath it,
//! and [`tokenize`] splits a header line into protocol tokens.

mod ctrl;
mod decoder;
mod message;
mod tokenizer;

pub use ctrl::{Control, Flow};
pub use decoder::Decoder;
pub use message::Message;
pub use tokenizer::tokenize;

use thiserror::Error;
use wfd_utils::RingError;

#[derive(Error, Debug)]
pub enum RtspError {
    #[error("channel already open")]
    AlreadyOpen,
    #[error("channel not open")]
    NotOpen,
    #[error("peer hung up")]
    BrokenPipe,
    #[error("content-length is not a decimal number")]
    InvalidContentLength,
    #[error("conflicting content-length values in one message")]
    ConflictingContentLength,
    #[error(transparent)]
    Ring(#[from] RingError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
