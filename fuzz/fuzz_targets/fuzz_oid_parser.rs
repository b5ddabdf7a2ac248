#![no_main]

use libfuzzer_sys::fuzz_target;

use async_agentx::oid::Oid;
use async_agentx::pdu::ByteOrder;
use async_agentx::pdu::wire::Reader;

fuzz_target!(|data: &[u8]| {
    let _ = Oid::from_ber(data);

    // AgentX compressed OID encoding, both byte orders
    let _ = Reader::new(data, ByteOrder::Big).oid();
    let _ = Reader::new(data, ByteOrder::Little).oid();

    if let Ok(s) = std::str::from_utf8(data) {
        let _ = Oid::parse(s);
    }
});
