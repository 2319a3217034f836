//! `/dev/hidrawN` backed transport.
//!
//! The node is opened once for reading and writing. Writes go through the
//! transport; a dedicated reader thread feeds every read into the owning
//! `RawDevice` until the device is dropped or the node goes away.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use super::raw::{RawDevice, RawTransport};

/// Vendor id of every receiver this crate speaks to.
pub const VENDOR_ID: u16 = 0x046D;

/// Product ids of Bolt receivers.
pub const BOLT_PRODUCT_IDS: &[u16] = &[0xC548];

pub struct HidrawTransport {
    file: File,
}

impl RawTransport for HidrawTransport {
    fn write_report(&self, report: &[u8]) -> io::Result<()> {
        (&self.file).write_all(report)
    }
}

/// Open `path` and start its reader thread.
pub fn open(path: &Path) -> io::Result<Arc<RawDevice>> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    let reader = file.try_clone()?;
    let device = Arc::new(RawDevice::new(
        path.display().to_string(),
        Box::new(HidrawTransport { file }),
    ));
    // Detached: exits on its own once the device is gone.
    let _reader = spawn_reader(reader, Arc::downgrade(&device))?;
    Ok(device)
}

/// The thread holds only a `Weak` to the device. Reads block, so once the
/// device is dropped the thread (and its fd) lingers until the next report
/// arrives or the node is unplugged; it then exits without delivering.
fn spawn_reader(mut reader: File, device: Weak<RawDevice>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("hidraw-reader".into())
        .spawn(move || {
            let mut buf = [0u8; 64];
            loop {
                let n = match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("Read from receiver failed: {e}");
                        break;
                    }
                };
                let Some(device) = device.upgrade() else {
                    break;
                };
                device.deliver(&buf[..n]);
            }
            debug!("Reader thread exiting");
        })
}

/// Look up `(vendor, product)` of a hidraw node through sysfs.
pub fn device_ids(path: &Path) -> io::Result<(u16, u16)> {
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "not a device node"))?;
    let uevent = Path::new("/sys/class/hidraw")
        .join(name)
        .join("device/uevent");
    parse_hid_id(&fs::read_to_string(&uevent)?)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no HID_ID in uevent"))
}

/// Extract vendor and product from a `HID_ID=bus:vendor:product` line.
fn parse_hid_id(uevent: &str) -> Option<(u16, u16)> {
    let id = uevent.lines().find_map(|l| l.strip_prefix("HID_ID="))?;
    let mut parts = id.split(':').skip(1);
    let vendor = u32::from_str_radix(parts.next()?, 16).ok()?;
    let product = u32::from_str_radix(parts.next()?, 16).ok()?;
    Some((u16::try_from(vendor).ok()?, u16::try_from(product).ok()?))
}

/// Whether the node belongs to a Bolt receiver.
pub fn is_bolt(path: &Path) -> io::Result<bool> {
    let (vendor, product) = device_ids(path)?;
    Ok(vendor == VENDOR_ID && BOLT_PRODUCT_IDS.contains(&product))
}
