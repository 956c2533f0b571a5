/** ------------------------------------------------------------
 * Radio resource (RRC) state reconstruction and energy analysis
 * of mobile device network traces.
 * ------------------------------------------------------------- */
pub mod analyzer;
pub mod burst;
pub mod energy_model;
pub mod errors;
pub mod packet;
pub mod periodic;
pub mod persistence;
pub mod profile;
pub mod properties;
pub mod queues;
pub mod rrc_state;
pub mod state_machine;
pub mod state_range;
pub mod statistic;
pub mod throughput;
pub mod trace_reader;
mod util;

pub use analyzer::{analyze_trace, AnalysisFilter, PacketAnalyzerResult, TraceData};
pub use burst::{Burst, BurstAnalysisInfo, BurstCategory, BurstCollectionAnalysisData};
pub use energy_model::{EnergyModel, PeripheralLogs};
pub use errors::RrcError;
pub use packet::{Direction, Packet, Protocol, Session, TcpInfo, TimeRange};
pub use profile::{Profile, ProfileKind, ProfileType};
pub use rrc_state::{RrcState, RrcStateRange};
pub use state_machine::{RrcAggregate, RrcStateMachine};
pub use trace_reader::read_pcap;
