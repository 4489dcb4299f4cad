#![allow(clippy::type_complexity)]

use std::collections::HashMap;
use std::fmt;

use tensorboard_rs::summary_writer::SummaryWriter;

pub mod brains;
pub mod envs;
pub mod hparams;
pub mod math;
pub mod trainer;

/// Timestamp of the current run, used to name log and checkpoint directories.
#[derive(Clone, PartialEq, Eq)]
pub struct Timestamp(String);

impl Default for Timestamp {
    fn default() -> Self {
        Self(chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thin wrapper around the tensorboard `SummaryWriter` that tolerates being
/// left uninitialized (all writes become no-ops).
#[derive(Default)]
pub struct TbWriter {
    writer: Option<SummaryWriter>,
}

impl TbWriter {
    pub fn init(&mut self, subdir: Option<&str>, timestamp: &Timestamp) {
        let dir = match subdir {
            Some(s) => format!("training/{}/{}", timestamp, s),
            None => format!("training/{}", timestamp),
        };
        self.writer = Some(SummaryWriter::new(&dir));
    }

    pub fn add_scalar(&mut self, label: &str, scalar: f32, step: usize) {
        if let Some(writer) = self.writer.as_mut() {
            writer.add_scalar(label, scalar, step);
        }
    }

    pub fn add_scalars(&mut self, label: &str, scalars: &HashMap<String, f32>, step: usize) {
        if let Some(writer) = self.writer.as_mut() {
            writer.add_scalars(label, scalars, step);
        }
    }

    pub fn close(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush();
        }
        self.writer = None;
    }
}
