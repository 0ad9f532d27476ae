#![no_main]

use libfuzzer_sys::fuzz_target;
use spanshot::dump::{format_dump, DumpParser, StackParser};
use spanshot::ExecutionContext;

fn shape(contexts: &[ExecutionContext]) -> Vec<(u64, Vec<&str>)> {
    contexts
        .iter()
        .map(|c| (c.id, c.stack.iter().map(|f| f.func.as_str()).collect()))
        .collect()
}

fuzz_target!(|data: &[u8]| {
    let parser = DumpParser::new();
    let (contexts, errors) = parser.parse(data);

    // A clean parse must read back with the same ids and frames
    if errors.is_empty() {
        let dump = format_dump(&contexts);
        let (again, errors) = parser.parse(dump.as_bytes());
        assert!(errors.is_empty());
        assert_eq!(shape(&again), shape(&contexts));
    }
});
