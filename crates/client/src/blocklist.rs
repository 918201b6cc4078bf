//! Security key blocklist
//!
//! FIDO/U2F authenticators are never exposed through the bridge. Matching
//! devices are dropped before they reach the registry.

use protocol::DeviceAnnouncement;

/// Usage page of FIDO authenticators
pub const FIDO_USAGE_PAGE: u16 = 0xF1D0;

/// Vendors blocked outright
const BLOCKED_VENDORS: &[u16] = &[
    0x096E, // Feitian (KEY-ID, HyperFIDO)
    0x1050, // Yubico
];

/// Individual (vendor, product) pairs
const BLOCKED_PRODUCTS: &[(u16, u16)] = &[
    (0x09C3, 0x0023), // HID Global BlueTrust Token
    (0x10C4, 0x8ACF), // U2F Zero
    (0x1209, 0x4321), // Mooltipass Mini-BLE
    (0x1209, 0x4322), // Mooltipass Arduino sketch
    (0x18D1, 0x5026), // Titan
    (0x1A44, 0x00BB), // VASCO
    (0x1D50, 0x60FC), // OnlyKey
    (0x1E0D, 0xF1AE), // Keydo AES
    (0x1E0D, 0xF1D0), // Neowave Keydo
    (0x1EA8, 0xF025), // Thetis
    (0x20A0, 0x4287), // Nitrokey
    (0x24DC, 0x0101), // JaCarta
    (0x2581, 0xF1D0), // Happlink
    (0x2ABE, 0x1002), // Bluink
    (0x2CCF, 0x0880), // Feitian USB, HyperFIDO
];

/// Whether a device must be hidden from the client
pub fn is_blocked(announcement: &DeviceAnnouncement) -> bool {
    is_blocked_id(
        announcement.vendor_id,
        announcement.product_id,
        announcement.usage_page,
    )
}

pub fn is_blocked_id(vendor_id: u16, product_id: u16, usage_page: u16) -> bool {
    usage_page == FIDO_USAGE_PAGE
        || BLOCKED_VENDORS.contains(&vendor_id)
        || BLOCKED_PRODUCTS.contains(&(vendor_id, product_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{create_mock_announcement, create_mock_announcement_with_usage};

    #[test]
    fn test_fido_usage_page_blocked_for_any_vendor() {
        let device = create_mock_announcement_with_usage(1, 1, 0x046D, 0xC52B, 0xF1D0, 0x01);
        assert!(is_blocked(&device));
    }

    #[test]
    fn test_blocked_vendor_any_product() {
        assert!(is_blocked(&create_mock_announcement(1, 1, 0x1050, 0x0407)));
        assert!(is_blocked(&create_mock_announcement(1, 1, 0x096E, 0x0001)));
    }

    #[test]
    fn test_blocked_product_pair_only() {
        assert!(is_blocked_id(0x20A0, 0x4287, 0x01));
        assert!(!is_blocked_id(0x20A0, 0x4288, 0x01));
    }

    #[test]
    fn test_ordinary_device_allowed() {
        assert!(!is_blocked(&create_mock_announcement(1, 1, 0x046D, 0xC52B)));
    }
}
