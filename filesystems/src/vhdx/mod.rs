// VHDX sparse/dynamic disk support
// Translates logical block addresses into byte offsets of the backing image
// via the VHDX Block Allocation Table (BAT).
// https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-vhdx/

pub mod bat;
pub mod headers;
pub mod metadata;
pub mod translator;

pub use translator::VhdxDiskTranslator;
