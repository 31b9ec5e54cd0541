/*!
 * Backend wire protocols.
 *
 * Each module encodes requests and decodes replies for one backend kind.
 * They do no I/O; the device adapters own the transports.
 */

#[cfg(feature = "retroarch")]
pub mod retroarch;
