//! Host integration: versioned JSON envelopes, the command router and the
//! stdio bridge used by native shells.

pub mod channel;
pub mod contract;
pub mod stdio;
