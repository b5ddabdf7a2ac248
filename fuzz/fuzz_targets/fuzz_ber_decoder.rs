#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;

use async_agentx::ber::{Decoder, decode_value};
use async_agentx::value::{Value, ValueType};

fuzz_target!(|data: &[u8]| {
    let bytes = Bytes::copy_from_slice(data);

    let mut decoder = Decoder::new(bytes.clone());
    let _ = decoder.read_integer();

    let mut decoder = Decoder::new(bytes.clone());
    let _ = decoder.read_octet_string();

    let mut decoder = Decoder::new(bytes.clone());
    let _ = decoder.read_oid();

    let mut decoder = Decoder::new(bytes.clone());
    let _ = decoder.read_ip_address();

    let mut decoder = Decoder::new(bytes);
    let _ = Value::decode(&mut decoder);

    // typed decode, as used for binding values
    let _ = decode_value(data, None);
    let _ = decode_value(data, Some(ValueType::Counter64));
});
