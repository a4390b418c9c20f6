//! Per-device protocol context store.
//!
//! ARP, IPv4, UDP, DHCP and TCP each need to hang their own state off a
//! network device without widening `NetworkDevice` itself or reaching for a
//! module-global singleton. This is the `(Device, TypeId) -> context`
//! registry described in the design notes: every protocol module calls
//! `set_context` once at initialize and `remove_context` at shutdown, and
//! looks its state up by device name + `TypeId` on every packet.
//!
//! Devices are identified by name (the same string `device::get_device` uses)
//! rather than a raw pointer, since device lifetime in this kernel is static.

use alloc::{boxed::Box, string::String, vec::Vec};
use core::any::{Any, TypeId};

use spin::Mutex;

/// One `(TypeId -> Box<dyn Any>)` slot attached to a single device.
struct ContextEntry {
    type_id: TypeId,
    value: Box<dyn Any + Send>,
}

struct DeviceContexts {
    device_name: String,
    entries: Vec<ContextEntry>,
}

/// Registry of every device's attached protocol contexts.
static REGISTRY: Mutex<Vec<DeviceContexts>> = Mutex::new(Vec::new());

/// Attach a typed context `T` to `device_name`, replacing any existing
/// context of the same type on that device.
pub fn set_context<T: Any + Send>(device_name: &str, value: T) {
    let mut registry = REGISTRY.lock();
    let dev = find_or_create(&mut registry, device_name);
    let type_id = TypeId::of::<T>();
    dev.entries.retain(|e| e.type_id != type_id);
    dev.entries.push(ContextEntry {
        type_id,
        value: Box::new(value),
    });
}

/// Remove the context of type `T` from `device_name`, if present.
pub fn remove_context<T: Any + Send>(device_name: &str) {
    let mut registry = REGISTRY.lock();
    if let Some(dev) = registry.iter_mut().find(|d| d.device_name == device_name) {
        let type_id = TypeId::of::<T>();
        dev.entries.retain(|e| e.type_id != type_id);
    }
}

/// Run `f` with a shared reference to `device_name`'s context of type `T`,
/// if one has been attached.
pub fn with_context<T: Any + Send, R>(device_name: &str, f: impl FnOnce(&T) -> R) -> Option<R> {
    let registry = REGISTRY.lock();
    let dev = registry.iter().find(|d| d.device_name == device_name)?;
    let type_id = TypeId::of::<T>();
    let entry = dev.entries.iter().find(|e| e.type_id == type_id)?;
    entry.value.downcast_ref::<T>().map(f)
}

/// Run `f` with a mutable reference to `device_name`'s context of type `T`,
/// if one has been attached.
pub fn with_context_mut<T: Any + Send, R>(
    device_name: &str,
    f: impl FnOnce(&mut T) -> R,
) -> Option<R> {
    let mut registry = REGISTRY.lock();
    let dev = registry.iter_mut().find(|d| d.device_name == device_name)?;
    let type_id = TypeId::of::<T>();
    let entry = dev.entries.iter_mut().find(|e| e.type_id == type_id)?;
    entry.value.downcast_mut::<T>().map(f)
}

/// True if `device_name` currently has a context of type `T` attached.
pub fn has_context<T: Any + Send>(device_name: &str) -> bool {
    let registry = REGISTRY.lock();
    registry
        .iter()
        .find(|d| d.device_name == device_name)
        .map(|d| d.entries.iter().any(|e| e.type_id == TypeId::of::<T>()))
        .unwrap_or(false)
}

/// Drop every context attached to `device_name` (called when a device is
/// removed).
pub fn clear_device(device_name: &str) {
    let mut registry = REGISTRY.lock();
    registry.retain(|d| d.device_name != device_name);
}

fn find_or_create<'a>(
    registry: &'a mut Vec<DeviceContexts>,
    device_name: &str,
) -> &'a mut DeviceContexts {
    if let Some(idx) = registry.iter().position(|d| d.device_name == device_name) {
        return &mut registry[idx];
    }
    registry.push(DeviceContexts {
        device_name: String::from(device_name),
        entries: Vec::new(),
    });
    registry.last_mut().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn attach_and_fetch_distinct_types() {
        clear_device("test0");
        set_context::<u32>("test0", 42);
        set_context::<&'static str>("test0", "hello");

        assert_eq!(with_context::<u32, u32>("test0", |v| *v), Some(42));
        assert_eq!(
            with_context::<&'static str, &'static str>("test0", |v| *v),
            Some("hello")
        );
    }

    #[test_case]
    fn independent_devices_do_not_share_state() {
        clear_device("dev-a");
        clear_device("dev-b");
        set_context::<u32>("dev-a", 1);
        set_context::<u32>("dev-b", 2);

        assert_eq!(with_context::<u32, u32>("dev-a", |v| *v), Some(1));
        assert_eq!(with_context::<u32, u32>("dev-b", |v| *v), Some(2));
    }

    #[test_case]
    fn remove_context_drops_only_that_type() {
        clear_device("test1");
        set_context::<u32>("test1", 7);
        set_context::<u64>("test1", 8);

        remove_context::<u32>("test1");

        assert!(with_context::<u32, ()>("test1", |_| ()).is_none());
        assert_eq!(with_context::<u64, u64>("test1", |v| *v), Some(8));
    }

    #[test_case]
    fn missing_device_returns_none() {
        clear_device("nonexistent");
        assert!(with_context::<u32, ()>("nonexistent", |_| ()).is_none());
    }
}
