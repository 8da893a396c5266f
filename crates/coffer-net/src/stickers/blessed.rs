//! Packs shipped with every install. They are downloaded on first launch and
//! never deleted.

use coffer_shared::PackId;
use coffer_store::StickerPackStatus;

/// `(pack id, hex pack key)`.
const BLESSED_PACKS: [(&str, &str); 6] = [
    (
        "9acc9e8aba563d26a4994e69263e3b25",
        "5a6dff3948c28efb9b7aaf93ecc375c69fc316e78077ed26867a14d10a0f6a12",
    ),
    (
        "fb535407d2f6497ec074df8b9c51dd1d",
        "17e971c134035622781d2ee249e6473b774583750b68c11bb82b7509c68b6dfd",
    ),
    (
        "e61fa0867031597467ccc036cc65d403",
        "13ae7b1a7407318280e9b38c1261ded38e0e7138b9f964a6ccbb73e40f737a9b",
    ),
    (
        "cca32f5b905208b7d0f1e17f23fdc185",
        "8bf8e95f7a45bdeafe0c8f5b002ef01ab95b8f1b5baac4019ccd6b6be0b1837a",
    ),
    (
        "ccc89a05dc077856b57351e90697976c",
        "45730e60f09d5566115223744537a6b7d9ea99ceeacb77a1fbd6801b9607fbcf",
    ),
    (
        "cfc50156556893ef9838069d3890fe49",
        "5f5beab7d382443cb00a1e48eb95297b6b8cadfd0631e5d0d9dc949e6999ff4b",
    ),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlessedPack {
    pub id: PackId,
    pub key: String,
    /// Status the pack is brought to on first launch.
    pub status: StickerPackStatus,
}

pub fn default_blessed_packs() -> Vec<BlessedPack> {
    BLESSED_PACKS
        .iter()
        .filter_map(|(id, key)| {
            Some(BlessedPack {
                id: PackId::parse(id).ok()?,
                key: key.to_string(),
                status: StickerPackStatus::Downloaded,
            })
        })
        .collect()
}
