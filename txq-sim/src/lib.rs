#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! A deterministic, single-threaded harness for exercising the `txq`
//! flow-control layer end to end: a discrete-event scheduler, a simulated
//! multi-queue device and a FIFO queueing discipline.

mod device;
mod discipline;
mod sim;

pub use device::{SimDevice, SimDeviceConfig};
pub use discipline::FifoDiscipline;
pub use sim::{Sim, SimTime};
