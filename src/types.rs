use crate::error::{ReadClientError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// --- Enums ---

/// Directive kind carried in the `type` field of an outbound envelope.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Subscribe,
    Unsubscribe,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Subscribe => "subscribe",
            MessageType::Unsubscribe => "unsubscribe",
        }
    }
}

impl FromStr for MessageType {
    type Err = ReadClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "subscribe" => Ok(MessageType::Subscribe),
            "unsubscribe" => Ok(MessageType::Unsubscribe),
            _ => Err(ReadClientError::invalid_argument("type")),
        }
    }
}

macro_rules! tx_types {
    ($($variant:ident => $wire:literal,)+) => {
        /// Closed catalog of transaction types a subscription may filter on.
        #[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum TxType {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl TxType {
            /// Every member of the catalog, in declaration order.
            pub const ALL: &'static [TxType] = &[$(TxType::$variant,)+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(TxType::$variant => $wire,)+
                }
            }
        }

        impl FromStr for TxType {
            type Err = ReadClientError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($wire => Ok(TxType::$variant),)+
                    _ => Err(ReadClientError::invalid_argument("tx_types")),
                }
            }
        }
    };
}

tx_types! {
    Master => "master",
    Address => "address",
    Addresses => "addresses",
    Account => "account",
    AccountInitialTxs => "account_initial_txs",
    Message => "message",
    MessageSent => "message_sent",
    MessageThreadDelete => "message_thread_delete",
    Transfer => "transfer",
    TransferCancel => "transfer_cancel",
    TransferSent => "transfer_sent",
    TransferReceiveDelete => "transfer_receive_delete",
    TransferInfo => "transfer_info",
    Storage => "storage",
    StorageDelete => "storage_delete",
    Backup => "backup",
    Contact => "contact",
    FileVirtual => "file_virtual",
    FileFs => "file_fs",
    RfileVirtual => "rfile_virtual",
    RfileFs => "rfile_fs",
    DfileVirtual => "dfile_virtual",
    DfileFs => "dfile_fs",
    PfileVirtual => "pfile_virtual",
    Request => "request",
    RequestIn => "request_in",
    RequestUpload => "request_upload",
    RequestCancel => "request_cancel",
    DataRoom => "data_room",
    DataRoomf => "data_roomf",
    DataRoomPolicy => "data_room_policy",
    DataRoomData => "data_room_data",
    DataRoomDataDelete => "data_room_data_delete",
    DataRoomDataPolicy => "data_room_data_policy",
    MultiDataRoom => "multi_data_room",
    MultiStorage => "multi_storage",
    MultiTransfer => "multi_transfer",
    MultiTransferSent => "multi_transfer_sent",
    MultiBackup => "multi_backup",
    MultiPasswd => "multi_passwd",
    PasswdData => "passwd_data",
    PasswdRoom => "passwd_room",
    PasswdRoomf => "passwd_roomf",
    PasswdRoomPolicy => "passwd_room_policy",
    PasswdRoomData => "passwd_room_data",
    PasswdRoomDataDelete => "passwd_room_data_delete",
    PasswdRoomDataPolicy => "passwd_room_data_policy",
    PasswdDatav2 => "passwd_datav2",
    PasswdDatav2Policy => "passwd_datav2_policy",
    Collection => "collection",
    CollectionPolicy => "collection_policy",
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for TxType {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Parses a caller-supplied filter list against the closed catalog.
///
/// Fails when the list is longer than the catalog or names an unknown type.
pub fn parse_tx_types<T: AsRef<str>>(raw: &[T]) -> Result<Vec<TxType>> {
    if raw.len() > TxType::ALL.len() {
        return Err(ReadClientError::invalid_argument("tx_types"));
    }
    raw.iter().map(|t| t.as_ref().parse()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_closed_and_round_trips() {
        assert_eq!(TxType::ALL.len(), 51);
        for tx_type in TxType::ALL {
            assert_eq!(tx_type.as_str().parse::<TxType>().unwrap(), *tx_type);
        }
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&TxType::DataRoomDataPolicy).unwrap();
        assert_eq!(json, "\"data_room_data_policy\"");
        let parsed: TxType = serde_json::from_str("\"storage\"").unwrap();
        assert_eq!(parsed, TxType::Storage);
    }

    #[test]
    fn test_parse_tx_types_rejects_unknown_and_oversized() {
        assert!(matches!(
            parse_tx_types(&["not-a-real-type"]),
            Err(ReadClientError::InvalidArgument(Some(ref f))) if f == "tx_types"
        ));

        let too_many: Vec<&str> = std::iter::repeat("storage")
            .take(TxType::ALL.len() + 1)
            .collect();
        assert!(parse_tx_types(&too_many).is_err());

        let parsed = parse_tx_types(&["storage", "transfer"]).unwrap();
        assert_eq!(parsed, vec![TxType::Storage, TxType::Transfer]);
    }

    #[test]
    fn test_message_type_parse() {
        assert_eq!(
            "unsubscribe".parse::<MessageType>().unwrap(),
            MessageType::Unsubscribe
        );
        assert!("publish".parse::<MessageType>().is_err());
    }
}
