//! Wideband sources and the FutureSDR receive graph.
//!
//! - [`source`]: the source trait, the reader thread and the graph's source block
//! - [`file_source`], [`demo_source`], [`rtlsdr_source`]: source implementations
//! - [`stage_block`], [`power_probe`], [`audio_sink`], [`spectrum_sink`]: graph blocks
//! - [`scanner`]: wires everything into one running graph

pub mod audio_sink;
pub mod demo_source;
pub mod file_source;
pub mod power_probe;
pub mod rtlsdr_source;
pub mod scanner;
pub mod source;
pub mod spectrum_sink;
pub mod stage_block;

pub use rtlsdr_source::list_devices;
pub use scanner::{Scanner, ScannerConfig, SourceKind};
