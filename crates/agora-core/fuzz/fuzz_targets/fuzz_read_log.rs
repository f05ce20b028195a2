#![no_main]
use agora_core::recorder::read_binary_log;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Feed arbitrary bytes to the binary log reader.
    // Must not panic -- returning Err is fine.
    let _ = read_binary_log(data);
});
