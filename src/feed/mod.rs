//! Change-feed channels.
//!
//! A [`ChangeFeedChannel`] wraps exactly one feed subscription with an
//! explicit Closed/Opening/Open/Closing lifecycle. Events carry no payload:
//! every signal means "something changed, re-fetch".

mod channel;

pub use channel::{ChangeFeedChannel, ChannelEvent, ChannelId, ChannelState};
