//! Command verb codes of the per-device node
//!
//! The node answers two read verbs encoded like Linux `_IOR('T', nr, int)`
//! requests. Anything else is rejected before the device is touched.

use crate::error::ProtocolError;
use crate::types::Probe;

const IOC_READ: u32 = 2;
const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = 8;
const IOC_SIZESHIFT: u32 = 16;
const IOC_DIRSHIFT: u32 = 30;

/// Magic byte shared by the TEMPer verbs
pub const COMMAND_MAGIC: u8 = b'T';

const fn ior(ty: u8, nr: u8, size: u32) -> u32 {
    (IOC_READ << IOC_DIRSHIFT)
        | ((ty as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
        | (size << IOC_SIZESHIFT)
}

/// `GET_INNER`: read the inner sensor as a signed 32-bit milli-degree value
pub const GET_INNER: u32 = ior(COMMAND_MAGIC, b'i', size_of::<i32>() as u32);

/// `GET_OUTER`: read the outer sensor as a signed 32-bit milli-degree value
pub const GET_OUTER: u32 = ior(COMMAND_MAGIC, b'o', size_of::<i32>() as u32);

/// Map a verb code to the probe it reads
pub fn probe_for_command(code: u32) -> Result<Probe, ProtocolError> {
    match code {
        GET_INNER => Ok(Probe::Inner),
        GET_OUTER => Ok(Probe::Outer),
        other => Err(ProtocolError::UnknownCommand(other)),
    }
}

/// Verb code reading the given probe
pub fn command_for_probe(probe: Probe) -> u32 {
    match probe {
        Probe::Inner => GET_INNER,
        Probe::Outer => GET_OUTER,
    }
}
