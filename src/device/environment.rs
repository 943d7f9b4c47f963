//! Compute device enumeration, ranking and selection.
//!
//! Enumeration sits behind [`DeviceProvider`] so that ranking and selection can
//! be exercised with synthetic device tables. The selected devices travel in a
//! request-scoped [`ComputeContext`]; nothing here is global.

use serde::{Deserialize, Serialize};

use crate::domain::DeviceSelection;
use crate::error::{Error, Result};

/// Broad throughput class of a device, used for default ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    DiscreteGpu,
    IntegratedGpu,
    Cpu,
    Other,
}

impl DeviceKind {
    fn class_rank(self) -> u8 {
        match self {
            DeviceKind::DiscreteGpu => 3,
            DeviceKind::IntegratedGpu => 2,
            DeviceKind::Cpu => 1,
            DeviceKind::Other => 0,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            DeviceKind::DiscreteGpu => "discrete GPU",
            DeviceKind::IntegratedGpu => "integrated GPU",
            DeviceKind::Cpu => "CPU",
            DeviceKind::Other => "other",
        }
    }
}

/// An enumerated compute device. Immutable once enumerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeDevice {
    pub platform_id: usize,
    pub device_id: usize,
    pub name: String,
    pub kind: DeviceKind,
    /// Parallel lanes the device offers (cores for a CPU).
    pub compute_units: usize,
    pub global_memory_bytes: u64,
}

impl ComputeDevice {
    /// The host processor, sized from the OS.
    pub fn host_cpu() -> Self {
        let compute_units = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            platform_id: 0,
            device_id: 0,
            name: format!("host CPU ({compute_units} threads)"),
            kind: DeviceKind::Cpu,
            compute_units,
            global_memory_bytes: host_memory_bytes().unwrap_or(0),
        }
    }

    pub fn label(&self) -> String {
        format!(
            "{} [platform {}, device {}, {}]",
            self.name,
            self.platform_id,
            self.device_id,
            self.kind.display_name()
        )
    }
}

/// Source of the device table.
pub trait DeviceProvider {
    fn enumerate(&self) -> Vec<ComputeDevice>;
}

/// Enumerates the devices this build can dispatch to.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostDeviceProvider;

impl DeviceProvider for HostDeviceProvider {
    fn enumerate(&self) -> Vec<ComputeDevice> {
        vec![ComputeDevice::host_cpu()]
    }
}

/// A fixed device table, e.g. for tests or for pinning a known configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceProvider(pub Vec<ComputeDevice>);

impl DeviceProvider for StaticDeviceProvider {
    fn enumerate(&self) -> Vec<ComputeDevice> {
        self.0.clone()
    }
}

/// All devices of this host, in enumeration order.
pub fn enumerate_devices() -> Vec<ComputeDevice> {
    HostDeviceProvider.enumerate()
}

/// Indices of `devices`, best first.
///
/// Ordering: throughput class, then compute units, then memory. Ties keep
/// enumeration order.
pub fn rank_devices(devices: &[ComputeDevice]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..devices.len()).collect();
    order.sort_by(|&a, &b| {
        let (da, db) = (&devices[a], &devices[b]);
        db.kind
            .class_rank()
            .cmp(&da.kind.class_rank())
            .then(db.compute_units.cmp(&da.compute_units))
            .then(db.global_memory_bytes.cmp(&da.global_memory_bytes))
            .then(a.cmp(&b))
    });
    order
}

/// The single highest-ranked device (empty if there are none).
pub fn smart_device_selection(devices: &[ComputeDevice]) -> Vec<ComputeDevice> {
    rank_devices(devices)
        .first()
        .map(|&i| vec![devices[i].clone()])
        .unwrap_or_default()
}

/// Resolve a selection against a device table.
///
/// Indices refer to enumeration order (as printed by `voxfit list-devices`).
/// Repeated indices are collapsed, keeping the first occurrence.
pub fn select(devices: &[ComputeDevice], selection: &DeviceSelection) -> Result<Vec<ComputeDevice>> {
    if devices.is_empty() {
        return Err(Error::NoComputeDeviceAvailable);
    }

    let indices: Vec<usize> = match selection {
        DeviceSelection::Auto => return Ok(smart_device_selection(devices)),
        DeviceSelection::Index(i) => vec![*i],
        DeviceSelection::Indices(list) => list.clone(),
    };
    if indices.is_empty() {
        return Ok(smart_device_selection(devices));
    }

    let mut out: Vec<ComputeDevice> = Vec::with_capacity(indices.len());
    let mut seen = Vec::with_capacity(indices.len());
    for index in indices {
        let device = devices.get(index).ok_or(Error::DeviceIndex {
            index,
            available: devices.len(),
        })?;
        if !seen.contains(&index) {
            seen.push(index);
            out.push(device.clone());
        }
    }
    Ok(out)
}

/// The devices a fit call dispatches to.
///
/// Set before invoking the fitting engine and read-only during a fit.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeContext {
    devices: Vec<ComputeDevice>,
}

impl ComputeContext {
    pub fn new(devices: Vec<ComputeDevice>) -> Result<Self> {
        if devices.is_empty() {
            return Err(Error::NoComputeDeviceAvailable);
        }
        Ok(Self { devices })
    }

    /// Enumerate with `provider` and apply `selection`.
    pub fn from_selection(provider: &dyn DeviceProvider, selection: &DeviceSelection) -> Result<Self> {
        let devices = provider.enumerate();
        Self::new(select(&devices, selection)?)
    }

    /// Smart selection over this host's devices.
    pub fn host() -> Result<Self> {
        Self::from_selection(&HostDeviceProvider, &DeviceSelection::Auto)
    }

    pub fn devices(&self) -> &[ComputeDevice] {
        &self.devices
    }
}

fn host_memory_bytes() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(device_id: usize, kind: DeviceKind, compute_units: usize, memory_gib: u64) -> ComputeDevice {
        ComputeDevice {
            platform_id: 0,
            device_id,
            name: format!("dev{device_id}"),
            kind,
            compute_units,
            global_memory_bytes: memory_gib << 30,
        }
    }

    fn table() -> Vec<ComputeDevice> {
        vec![
            device(0, DeviceKind::Cpu, 32, 64),
            device(1, DeviceKind::IntegratedGpu, 24, 2),
            device(2, DeviceKind::DiscreteGpu, 40, 8),
            device(3, DeviceKind::DiscreteGpu, 40, 16),
        ]
    }

    #[test]
    fn ranking_prefers_discrete_then_units_then_memory() {
        assert_eq!(rank_devices(&table()), vec![3, 2, 1, 0]);
    }

    #[test]
    fn ranking_ties_keep_enumeration_order() {
        let devices = vec![device(0, DeviceKind::Cpu, 4, 1), device(1, DeviceKind::Cpu, 4, 1)];
        assert_eq!(rank_devices(&devices), vec![0, 1]);
    }

    #[test]
    fn auto_selects_single_best_device() {
        let chosen = select(&table(), &DeviceSelection::Auto).unwrap();
        assert_eq!(chosen.len(), 1);
        assert_eq!(chosen[0].device_id, 3);
    }

    #[test]
    fn explicit_indices_follow_enumeration_order() {
        let chosen = select(&table(), &DeviceSelection::Indices(vec![1, 0, 1])).unwrap();
        let ids: Vec<usize> = chosen.iter().map(|d| d.device_id).collect();
        assert_eq!(ids, vec![1, 0]);
    }

    #[test]
    fn bad_index_is_a_configuration_error() {
        let err = select(&table(), &DeviceSelection::Index(9)).unwrap_err();
        assert!(matches!(err, Error::DeviceIndex { index: 9, available: 4 }));
    }

    #[test]
    fn empty_table_fails_fast() {
        let err = ComputeContext::from_selection(&StaticDeviceProvider::default(), &DeviceSelection::Auto)
            .unwrap_err();
        assert!(matches!(err, Error::NoComputeDeviceAvailable));
    }

    #[test]
    fn host_provider_reports_a_cpu() {
        let devices = enumerate_devices();
        assert!(!devices.is_empty());
        assert!(devices.iter().all(|d| d.compute_units >= 1));
    }
}
