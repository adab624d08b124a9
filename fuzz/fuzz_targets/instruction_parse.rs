#![no_main]

use libfuzzer_sys::fuzz_target;
use zoomrec_types::Instruction;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let instruction = Instruction::parse(&raw);
    let rendered = instruction.to_string();
    assert_eq!(Instruction::parse(&rendered), instruction);
});
