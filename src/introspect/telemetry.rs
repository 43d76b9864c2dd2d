//! RUSD telemetry region decoding
//!
//! Every sub-record opens with a `u64 lastModifiedTimestamp` that the driver
//! bumps when it refreshes the record. A zero timestamp means the record was
//! never populated, which is reported as `None` rather than as zeroes.

use crate::error::RmResult;
use crate::memory::{read_vec, ByteView, MemoryReader};
use crate::offsets::{OffsetTable, TelemetryLayout, TemperatureLayout};
use serde::{Deserialize, Serialize};

/// Value together with the driver's refresh timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamped<T> {
    /// `lastModifiedTimestamp`
    pub last_modified: u64,
    /// Decoded record
    pub value: T,
}

/// BAR1 aperture usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar1Memory {
    /// Aperture size in KiB
    pub bar1_size: u64,
    /// Unused aperture in KiB
    pub bar1_avail_size: u64,
}

/// Physical memory allocator totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmaMemory {
    /// Total bytes managed
    pub total: u64,
    /// Bytes not allocated
    pub free: u64,
}

/// Volatile ECC error counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EccCounts {
    /// Corrected since driver load
    pub corrected: u64,
    /// Uncorrected since driver load
    pub uncorrected: u64,
}

/// Public clock domains in MHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clocks {
    /// Graphics clock
    pub graphics_mhz: u32,
    /// Memory clock
    pub memory_mhz: u32,
    /// Video clock
    pub video_mhz: u32,
}

/// Device utilization in percent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerfUtilization {
    /// Graphics engine busy
    pub gpu_percent: u32,
    /// Frame buffer busy
    pub memory_percent: u32,
}

/// GPU power limits in milliwatts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerLimits {
    /// Limit requested by clients
    pub requested_mw: u32,
    /// Limit in effect
    pub enforced_mw: u32,
}

/// PCIe link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PciLink {
    /// Link generation
    pub generation: u32,
    /// Lane count
    pub width: u32,
}

/// Temperature sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureSensor {
    /// GPU core
    Gpu,
    /// Memory
    Memory,
}

/// One labelled temperature reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureReading {
    /// Sensor the reading belongs to
    pub sensor: TemperatureSensor,
    /// Degrees Celsius
    pub celsius: f64,
    /// `lastModifiedTimestamp` of the record holding the reading
    pub last_modified: u64,
}

/// Decoded RUSD region
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetryRegion {
    /// BAR1 usage
    pub bar1_memory: Option<Stamped<Bar1Memory>>,
    /// Allocator totals
    pub pma_memory: Option<Stamped<PmaMemory>>,
    /// ECC counters
    pub ecc: Option<Stamped<EccCounts>>,
    /// Clocks
    pub clocks: Option<Stamped<Clocks>>,
    /// Utilization
    pub perf: Option<Stamped<PerfUtilization>>,
    /// Power limits
    pub power: Option<Stamped<PowerLimits>>,
    /// Zero, one or two readings whatever the driver's record shape
    pub temperatures: Vec<TemperatureReading>,
    /// PCIe link
    pub pci: Option<Stamped<PciLink>>,
}

impl TelemetryRegion {
    /// Whether the driver has populated nothing yet
    pub fn is_empty(&self) -> bool {
        self.bar1_memory.is_none()
            && self.pma_memory.is_none()
            && self.ecc.is_none()
            && self.clocks.is_none()
            && self.perf.is_none()
            && self.power.is_none()
            && self.temperatures.is_empty()
            && self.pci.is_none()
    }

    /// Reading of one sensor
    pub fn temperature(&self, sensor: TemperatureSensor) -> Option<&TemperatureReading> {
        self.temperatures.iter().find(|t| t.sensor == sensor)
    }
}

/// `NvTemp` is signed 24.8 fixed point
fn celsius(raw: i32) -> f64 {
    raw as f64 / 256.0
}

/// Decode the record at `offset` unless its timestamp is zero
///
/// `body` receives the offset of the first field after the timestamp.
fn stamped<T>(
    view: &ByteView<'_>,
    offset: usize,
    body: impl FnOnce(&ByteView<'_>, usize) -> RmResult<T>,
) -> RmResult<Option<Stamped<T>>> {
    let last_modified = view.read_u64(offset)?;
    if last_modified == 0 {
        return Ok(None);
    }
    Ok(Some(Stamped {
        last_modified,
        value: body(view, offset + 8)?,
    }))
}

fn temperatures(
    view: &ByteView<'_>,
    layout: &TelemetryLayout,
) -> RmResult<Vec<TemperatureReading>> {
    let at = layout.temperature;
    let mut readings = Vec::with_capacity(2);
    match layout.temperature_layout {
        TemperatureLayout::Combined => {
            let last_modified = view.read_u64(at)?;
            if last_modified != 0 {
                readings.push(TemperatureReading {
                    sensor: TemperatureSensor::Gpu,
                    celsius: celsius(view.read_i32(at + 8)?),
                    last_modified,
                });
                readings.push(TemperatureReading {
                    sensor: TemperatureSensor::Memory,
                    celsius: celsius(view.read_i32(at + 12)?),
                    last_modified,
                });
            }
        }
        TemperatureLayout::PerSensor => {
            let sensors = [TemperatureSensor::Gpu, TemperatureSensor::Memory];
            for (i, sensor) in sensors.into_iter().enumerate() {
                let record = at + i * 16;
                let last_modified = view.read_u64(record)?;
                if last_modified != 0 {
                    readings.push(TemperatureReading {
                        sensor,
                        celsius: celsius(view.read_i32(record + 8)?),
                        last_modified,
                    });
                }
            }
        }
    }
    Ok(readings)
}

/// Decode a captured RUSD region
pub fn decode_telemetry(region: &[u8], table: &OffsetTable) -> RmResult<TelemetryRegion> {
    let layout = table.telemetry_layout()?;
    let view = ByteView::new(region);

    Ok(TelemetryRegion {
        bar1_memory: stamped(&view, layout.bar1_memory, |v, at| {
            Ok(Bar1Memory {
                bar1_size: v.read_u64(at)?,
                bar1_avail_size: v.read_u64(at + 8)?,
            })
        })?,
        pma_memory: stamped(&view, layout.pma_memory, |v, at| {
            Ok(PmaMemory {
                total: v.read_u64(at)?,
                free: v.read_u64(at + 8)?,
            })
        })?,
        ecc: stamped(&view, layout.ecc, |v, at| {
            Ok(EccCounts {
                corrected: v.read_u64(at)?,
                uncorrected: v.read_u64(at + 8)?,
            })
        })?,
        clocks: stamped(&view, layout.clocks, |v, at| {
            Ok(Clocks {
                graphics_mhz: v.read_u32(at)?,
                memory_mhz: v.read_u32(at + 4)?,
                video_mhz: v.read_u32(at + 8)?,
            })
        })?,
        perf: stamped(&view, layout.perf, |v, at| {
            Ok(PerfUtilization {
                gpu_percent: v.read_u32(at)?,
                memory_percent: v.read_u32(at + 4)?,
            })
        })?,
        power: stamped(&view, layout.power, |v, at| {
            Ok(PowerLimits {
                requested_mw: v.read_u32(at)?,
                enforced_mw: v.read_u32(at + 4)?,
            })
        })?,
        temperatures: temperatures(&view, layout)?,
        pci: stamped(&view, layout.pci, |v, at| {
            Ok(PciLink {
                generation: v.read_u32(at)?,
                width: v.read_u32(at + 4)?,
            })
        })?,
    })
}

/// Capture the RUSD region at `region_base` in one read and decode it
pub fn read_telemetry<M: MemoryReader + ?Sized>(
    mem: &M,
    region_base: u64,
    table: &OffsetTable,
) -> RmResult<TelemetryRegion> {
    let layout = table.telemetry_layout()?;
    let raw = read_vec(mem, region_base, layout.region_size)?;
    decode_telemetry(&raw, table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RmError;
    use crate::memory::RegionMap;
    use crate::offsets::DriverVersion;
    use pretty_assertions::assert_eq;

    fn put(region: &mut [u8], at: usize, bytes: &[u8]) {
        region[at..at + bytes.len()].copy_from_slice(bytes);
    }

    #[test]
    fn test_zero_timestamp_is_absent_even_with_data() {
        let table = DriverVersion::V570_124_06.offsets();
        let layout = table.telemetry.unwrap();
        let mut region = vec![0u8; layout.region_size];
        put(&mut region, layout.power + 8, &250_000u32.to_ne_bytes());

        let decoded = decode_telemetry(&region, table).unwrap();
        assert_eq!(decoded.power, None);
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_stamped_zero_counters_are_present() {
        let table = DriverVersion::V570_124_06.offsets();
        let layout = table.telemetry.unwrap();
        let mut region = vec![0u8; layout.region_size];
        put(&mut region, layout.ecc, &77u64.to_ne_bytes());

        let decoded = decode_telemetry(&region, table).unwrap();
        assert_eq!(
            decoded.ecc,
            Some(Stamped {
                last_modified: 77,
                value: EccCounts {
                    corrected: 0,
                    uncorrected: 0
                }
            })
        );
        assert!(!decoded.is_empty());
    }

    #[test]
    fn test_per_sensor_temperatures_are_independent() {
        let table = DriverVersion::V565_57_01.offsets();
        let layout = table.telemetry.unwrap();
        let mut region = vec![0u8; layout.region_size];
        // memory sensor only, 45.5 C
        put(&mut region, layout.temperature + 16, &9u64.to_ne_bytes());
        put(&mut region, layout.temperature + 24, &(45 * 256 + 128i32).to_ne_bytes());

        let decoded = decode_telemetry(&region, table).unwrap();
        assert_eq!(decoded.temperatures.len(), 1);
        let memory = decoded.temperature(TemperatureSensor::Memory).unwrap();
        assert_eq!(memory.celsius, 45.5);
        assert!(decoded.temperature(TemperatureSensor::Gpu).is_none());
    }

    #[test]
    fn test_combined_temperature_gives_two_readings() {
        let table = DriverVersion::V555_58_02.offsets();
        let layout = table.telemetry.unwrap();
        let mut region = vec![0u8; layout.region_size];
        put(&mut region, layout.temperature, &5u64.to_ne_bytes());
        put(&mut region, layout.temperature + 8, &(60 * 256i32).to_ne_bytes());
        put(&mut region, layout.temperature + 12, &(-256i32).to_ne_bytes());

        let decoded = decode_telemetry(&region, table).unwrap();
        let sensors: Vec<_> = decoded.temperatures.iter().map(|t| (t.sensor, t.celsius)).collect();
        assert_eq!(
            sensors,
            vec![(TemperatureSensor::Gpu, 60.0), (TemperatureSensor::Memory, -1.0)]
        );
    }

    #[test]
    fn test_read_from_memory() {
        let table = DriverVersion::V560_28_03.offsets();
        let layout = table.telemetry.unwrap();
        let mut region = vec![0u8; layout.region_size];
        put(&mut region, layout.clocks, &3u64.to_ne_bytes());
        put(&mut region, layout.clocks + 8, &1980u32.to_ne_bytes());
        put(&mut region, layout.clocks + 12, &10501u32.to_ne_bytes());
        let mut mem = RegionMap::new();
        mem.insert(0xffff_c900_0000_0000, region);

        let decoded = read_telemetry(&mem, 0xffff_c900_0000_0000, table).unwrap();
        let clocks = decoded.clocks.unwrap().value;
        assert_eq!((clocks.graphics_mhz, clocks.memory_mhz, clocks.video_mhz), (1980, 10501, 0));
    }

    #[test]
    fn test_release_without_layout() {
        let table = DriverVersion::V555_42_02.offsets();
        assert!(matches!(
            decode_telemetry(&[0u8; 256], table),
            Err(RmError::TelemetryUnsupported(_))
        ));
    }

    #[test]
    fn test_truncated_region() {
        let table = DriverVersion::V570_124_04.offsets();
        assert!(matches!(
            decode_telemetry(&[0u8; 64], table),
            Err(RmError::OutOfBounds { .. })
        ));
    }
}
