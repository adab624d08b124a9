#![no_main]

use libfuzzer_sys::fuzz_target;
use zoomrec_types::Filter;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let mut parts = raw.splitn(3, '\n');
    let (Some(field), Some(op), Some(value)) = (parts.next(), parts.next(), parts.next()) else {
        return;
    };
    if let Ok(filter) = Filter::parse(field, op, value) {
        let rendered = filter.value.to_query_value();
        let reparsed = Filter::parse(field, filter.op.as_str(), &rendered)
            .expect("rendered filter parses");
        assert_eq!(reparsed.op, filter.op);
    }
});
