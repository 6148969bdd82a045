//! Concrete drivers and the device table that binds them.

pub mod chroma;
pub mod copperhead;
pub mod deathadder;
pub mod deathadder2013;
pub mod krait;
pub mod lachesis;
pub mod lachesis5k6;
pub mod naga;
pub mod taipan;

use crate::driver::MouseDriver;
use crate::usb::DeviceDescriptor;
use crate::RAZER_VID;

/// Vendor or product id that matches anything.
pub const WILDCARD: u16 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    DeathAdder,
    DeathAdder2013,
    DeathAdderChroma,
    DeathAdder3500,
    Krait,
    Lachesis,
    Lachesis5k6,
    Naga,
    Copperhead,
    BoomslangCe,
    Taipan,
    MambaTe,
    DiamondbackChroma,
}

impl DriverKind {
    /// Fresh, uninitialized driver for a device of this kind.
    pub fn create(self, desc: &DeviceDescriptor) -> Box<dyn MouseDriver> {
        match self {
            Self::DeathAdder => Box::new(deathadder::DeathAdder::new(desc.product_id)),
            Self::DeathAdder2013 => Box::new(deathadder2013::DeathAdder2013::new()),
            Self::DeathAdderChroma => {
                Box::new(chroma::Chroma::new(chroma::ChromaModel::DeathAdderChroma))
            }
            Self::DeathAdder3500 => Box::new(chroma::Chroma::new(chroma::ChromaModel::DeathAdder3500)),
            Self::MambaTe => Box::new(chroma::Chroma::new(chroma::ChromaModel::MambaTe)),
            Self::DiamondbackChroma => {
                Box::new(chroma::Chroma::new(chroma::ChromaModel::DiamondbackChroma))
            }
            Self::Krait => Box::new(krait::Krait::new()),
            Self::Lachesis => Box::new(lachesis::Lachesis::new()),
            Self::Lachesis5k6 => Box::new(lachesis5k6::Lachesis5k6::new()),
            Self::Naga => Box::new(naga::Naga::new(desc.product_id)),
            Self::Copperhead => Box::new(copperhead::ProfCfgMouse::new(copperhead::Model::Copperhead)),
            Self::BoomslangCe => Box::new(copperhead::ProfCfgMouse::new(copperhead::Model::BoomslangCe)),
            Self::Taipan => Box::new(taipan::Taipan::new()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceId {
    pub vendor_id: u16,
    pub product_id: u16,
    pub kind: DriverKind,
}

const fn razer(product_id: u16, kind: DriverKind) -> DeviceId {
    DeviceId {
        vendor_id: RAZER_VID,
        product_id,
        kind,
    }
}

/// Supported devices. Lookups take the first match.
pub const DEVICE_TABLE: &[DeviceId] = &[
    razer(0x0007, DriverKind::DeathAdder),
    razer(0x0016, DriverKind::DeathAdder),
    razer(0x0029, DriverKind::DeathAdder),
    razer(0x0037, DriverKind::DeathAdder2013),
    razer(0x0043, DriverKind::DeathAdderChroma),
    razer(0x0054, DriverKind::DeathAdder3500),
    razer(0x0003, DriverKind::Krait),
    razer(0x000C, DriverKind::Lachesis),
    razer(0x001E, DriverKind::Lachesis5k6),
    razer(0x0015, DriverKind::Naga),
    razer(0x001F, DriverKind::Naga),
    razer(0x002E, DriverKind::Naga),
    razer(0x0036, DriverKind::Naga),
    razer(0x0040, DriverKind::Naga),
    razer(0x0041, DriverKind::Naga),
    razer(0x0101, DriverKind::Copperhead),
    razer(0x0005, DriverKind::BoomslangCe),
    razer(0x0034, DriverKind::Taipan),
    razer(0x0046, DriverKind::MambaTe),
    razer(0x004C, DriverKind::DiamondbackChroma),
];

fn id_matches(want: u16, have: u16) -> bool {
    want == WILDCARD || want == have
}

/// First entry of `table` matching `desc`.
pub fn match_in(table: &[DeviceId], desc: &DeviceDescriptor) -> Option<DriverKind> {
    table
        .iter()
        .find(|e| id_matches(e.vendor_id, desc.vendor_id) && id_matches(e.product_id, desc.product_id))
        .map(|e| e.kind)
}

pub fn match_device(desc: &DeviceDescriptor) -> Option<DriverKind> {
    match_in(DEVICE_TABLE, desc)
}
