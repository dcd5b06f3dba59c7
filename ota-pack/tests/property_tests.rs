use ota_pack::crc::{calculate_crc32, calculate_md5};
use ota_pack::crypto;
use ota_pack::image_header::{HEADER_V1_SIZE, HEADER_V2_SIZE};
use ota_pack::{
    CompressionType, DeltaType, EncryptionType, Header, HeaderError, HeaderFields, HeaderV1,
    HeaderV2, HeaderVersion, PackageConfig,
};
use proptest::prelude::*;

fn compression() -> impl Strategy<Value = CompressionType> {
    prop_oneof![Just(CompressionType::None), Just(CompressionType::Xz)]
}

fn delta() -> impl Strategy<Value = DeltaType> {
    prop_oneof![Just(DeltaType::None), Just(DeltaType::BinaryDelta)]
}

fn encryption() -> impl Strategy<Value = EncryptionType> {
    prop_oneof![Just(EncryptionType::None), Just(EncryptionType::Aes128)]
}

prop_compose! {
    fn header_fields()(
        compression in compression(),
        delta in delta(),
        encryption in encryption(),
        firmware_version in "[0-9a-zA-Z._-]{0,31}",
        payload in proptest::collection::vec(any::<u8>(), 0..256),
    ) -> HeaderFields {
        HeaderFields {
            compression,
            delta,
            encryption,
            firmware_version,
            payload_len: payload.len() as u32,
            payload_md5: calculate_md5(&payload),
        }
    }
}

fn header() -> impl Strategy<Value = Header> {
    prop_oneof![
        header_fields().prop_map(|fields| Header::V1(HeaderV1 { fields })),
        (header_fields(), any::<u32>(), any::<u32>()).prop_map(
            |(fields, base_check_len, base_crc32)| Header::V2(HeaderV2 {
                fields,
                base_check_len,
                base_crc32,
            })
        ),
    ]
}

proptest! {
    #[test]
    fn header_round_trip(header in header()) {
        let bytes = header.encode().unwrap();
        prop_assert_eq!(bytes.len(), header.size());
        prop_assert_eq!(Header::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn header_crc_covers_preceding_bytes(header in header()) {
        let bytes = header.encode().unwrap();
        let crc_offset = bytes.len() - 4;
        let stored = u32::from_le_bytes(bytes[crc_offset..].try_into().unwrap());
        prop_assert_eq!(stored, calculate_crc32(&bytes[..crc_offset]));
    }

    #[test]
    fn header_mutation_is_detected(header in header(), index in any::<prop::sample::Index>(), flip in 1u8..) {
        let mut bytes = header.encode().unwrap();
        let crc_offset = bytes.len() - 4;
        // Magic and version are checked before the CRC; skip them.
        let i = 5 + index.index(crc_offset - 5);
        bytes[i] ^= flip;
        prop_assert!(Header::decode(&bytes).is_err());
    }

    #[test]
    fn v1_and_v2_sizes(header in header()) {
        let expected = match header.version() {
            HeaderVersion::V1 => HEADER_V1_SIZE,
            HeaderVersion::V2 => HEADER_V2_SIZE,
        };
        prop_assert_eq!(header.encode().unwrap().len(), expected);
    }

    #[test]
    fn decode_rejects_short_input(header in header(), cut in 1usize..80) {
        let bytes = header.encode().unwrap();
        let truncated = &bytes[..bytes.len() - cut];
        prop_assert!(Header::decode(truncated).is_err());
    }

    #[test]
    fn pad_unpad(data in proptest::collection::vec(any::<u8>(), 0..200)) {
        let padded = crypto::pad(&data);
        prop_assert_eq!(padded.len() % crypto::AES_BLOCK_SIZE, 0);
        prop_assert!(padded.len() > data.len());
        prop_assert_eq!(crypto::unpad(&padded).unwrap(), &data[..]);
    }

    #[test]
    fn encrypt_decrypt(key in any::<[u8; 16]>(), data in proptest::collection::vec(any::<u8>(), 0..200)) {
        let mut buffer = crypto::encrypt_artifact(&key, &data).unwrap();
        crypto::decrypt_ecb(&key, &mut buffer).unwrap();
        prop_assert_eq!(crypto::unpad(&buffer).unwrap(), &data[..]);
    }

    #[test]
    fn encryption_is_recorded_only_with_key(
        payload in proptest::collection::vec(any::<u8>(), 0..64),
        with_key in any::<bool>(),
    ) {
        let mut config = PackageConfig::new("app.bin").encryption(EncryptionType::Aes128);
        if with_key {
            config = config.encryption_key("aes.key");
        }
        let header = Header::for_payload(&config, &payload).unwrap();
        let expected = if with_key { EncryptionType::Aes128 } else { EncryptionType::None };
        prop_assert_eq!(header.fields().encryption, expected);
        prop_assert_eq!(header.encode().unwrap()[6], expected as u8);
    }
}

#[test]
fn version_too_long_is_rejected() {
    let header = Header::V1(HeaderV1 {
        fields: HeaderFields {
            compression: CompressionType::Xz,
            delta: DeltaType::None,
            encryption: EncryptionType::None,
            firmware_version: "a".repeat(32),
            payload_len: 0,
            payload_md5: calculate_md5(&[]),
        },
    });
    assert_eq!(
        header.encode(),
        Err(HeaderError::VersionTooLong { len: 32, max: 31 })
    );
}
