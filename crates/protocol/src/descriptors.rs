//! Raw USB descriptor parsing
//!
//! Only what the drivers need: splitting the concatenated descriptor blob
//! returned by the host into individual descriptors, and locating CDC-ACM
//! functions through Interface Association Descriptors (IAD).

/// Device descriptor type
pub const DESCRIPTOR_TYPE_DEVICE: u8 = 0x01;
/// Interface association descriptor type
pub const DESCRIPTOR_TYPE_IAD: u8 = 0x0b;
/// Length of a device descriptor
pub const DEVICE_DESCRIPTOR_LEN: usize = 18;
/// Length of an interface association descriptor
pub const IAD_LEN: usize = 8;

/// USB class: Communications and CDC Control
pub const USB_CLASS_COMM: u8 = 0x02;
/// USB class: CDC Data
pub const USB_CLASS_CDC_DATA: u8 = 0x0a;
/// USB class: Miscellaneous (used by IAD composite devices)
pub const USB_CLASS_MISC: u8 = 0xef;
/// CDC subclass: Abstract Control Model
pub const USB_SUBCLASS_ACM: u8 = 0x02;

/// Offset of the `bcdDevice` high byte in the device descriptor
///
/// FTDI encodes the chip type there (7, 8, 9 = the "H" variants).
pub const DEVICE_RELEASE_HIGH_OFFSET: usize = 13;

/// Split a concatenated descriptor blob into individual descriptors
///
/// Parsing stops at the first zero `bLength`. A descriptor running past the
/// end of the blob is kept, cut short.
pub fn split_descriptors(raw: &[u8]) -> Vec<&[u8]> {
    let mut descriptors = Vec::new();
    let mut pos = 0;
    while pos < raw.len() {
        let len = raw[pos] as usize;
        if len == 0 {
            break;
        }
        let end = (pos + len).min(raw.len());
        descriptors.push(&raw[pos..end]);
        pos = end;
    }
    descriptors
}

/// Whether `descriptor` is a device descriptor announcing IAD usage
/// (class Miscellaneous, subclass 2, protocol 1)
pub fn is_iad_device(descriptor: &[u8]) -> bool {
    descriptor.len() == DEVICE_DESCRIPTOR_LEN
        && descriptor[1] == DESCRIPTOR_TYPE_DEVICE
        && descriptor[4] == USB_CLASS_MISC
        && descriptor[5] == 2
        && descriptor[6] == 1
}

/// Find the first interface number of the `port_index`-th CDC-ACM function
///
/// Returns `None` when the device does not use IADs, when there are fewer
/// ACM functions than `port_index + 1`, or when the matching IAD does not
/// group exactly two interfaces.
pub fn acm_first_interface(descriptors: &[&[u8]], port_index: usize) -> Option<u8> {
    let (device, rest) = descriptors.split_first()?;
    if !is_iad_device(device) {
        return None;
    }

    rest.iter()
        .filter(|d| {
            d.len() == IAD_LEN
                && d[1] == DESCRIPTOR_TYPE_IAD
                && d[4] == USB_CLASS_COMM
                && d[5] == USB_SUBCLASS_ACM
        })
        .nth(port_index)
        .filter(|iad| iad[3] == 2)
        .map(|iad| iad[2])
}

/// Device release high byte from a raw descriptor blob
pub fn device_release_high(raw: &[u8]) -> Option<u8> {
    raw.get(DEVICE_RELEASE_HIGH_OFFSET).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iad_device_descriptor() -> Vec<u8> {
        vec![
            18, 0x01, 0x00, 0x02, 0xef, 0x02, 0x01, 64, 0x34, 0x12, 0x78, 0x56, 0x00, 0x01, 1, 2,
            3, 1,
        ]
    }

    fn acm_iad(first: u8, count: u8) -> Vec<u8> {
        vec![8, 0x0b, first, count, 0x02, 0x02, 0x01, 0]
    }

    #[test]
    fn test_split_descriptors() {
        let mut raw = iad_device_descriptor();
        raw.extend(acm_iad(0, 2));
        raw.extend([0, 0, 0]);

        let descriptors = split_descriptors(&raw);
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].len(), 18);
        assert_eq!(descriptors[1].len(), 8);
    }

    #[test]
    fn test_split_keeps_truncated_descriptor() {
        let mut raw = iad_device_descriptor();
        raw.extend([9u8, 0x02, 0x00]);

        let descriptors = split_descriptors(&raw);
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[1], &[9u8, 0x02, 0x00][..]);

        // a truncated IAD is not mistaken for a complete one
        let mut raw = iad_device_descriptor();
        raw.extend(&acm_iad(0, 2)[..5]);
        let descriptors = split_descriptors(&raw);
        assert_eq!(descriptors.len(), 2);
        assert_eq!(acm_first_interface(&descriptors, 0), None);
    }

    #[test]
    fn test_acm_first_interface_requires_two_interfaces() {
        let device = iad_device_descriptor();
        let good = acm_iad(4, 2);
        let bad = acm_iad(6, 3);
        let descriptors: Vec<&[u8]> = vec![&device, &good, &bad];

        assert_eq!(acm_first_interface(&descriptors, 0), Some(4));
        assert_eq!(acm_first_interface(&descriptors, 1), None);
        assert_eq!(acm_first_interface(&descriptors, 2), None);
    }

    #[test]
    fn test_acm_first_interface_ignores_non_iad_devices() {
        let mut device = iad_device_descriptor();
        device[4] = 0x02;
        let iad = acm_iad(0, 2);
        let descriptors: Vec<&[u8]> = vec![&device, &iad];

        assert_eq!(acm_first_interface(&descriptors, 0), None);
    }

    #[test]
    fn test_device_release_high() {
        let raw = iad_device_descriptor();
        assert_eq!(device_release_high(&raw), Some(0x01));
        assert_eq!(device_release_high(&raw[..10]), None);
    }
}
