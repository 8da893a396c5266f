use coffer_shared::PackId;
use coffer_store::{Sticker, StickerPack, StickerPackStatus};

/// Capacity of the event channel. Slow observers see `Lagged`.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Changes observers (the UI) can follow. Serialized with a `type` tag so
/// a host can forward them as JSON.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StickerEvent {
    /// A pack appeared or was replaced wholesale.
    PackAdded { pack: StickerPack },
    StatusChanged {
        pack_id: PackId,
        status: StickerPackStatus,
        attempted_status: Option<StickerPackStatus>,
    },
    StickerAdded { sticker: Sticker },
    PackRemoved { pack_id: PackId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let pack_id = PackId::parse("0123456789abcdef0123456789abcdef").unwrap();
        let event = StickerEvent::StatusChanged {
            pack_id,
            status: StickerPackStatus::Installed,
            attempted_status: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status_changed");
        assert_eq!(json["pack_id"], "0123456789abcdef0123456789abcdef");
        assert_eq!(json["status"], "installed");
        assert!(json["attempted_status"].is_null());
    }
}
