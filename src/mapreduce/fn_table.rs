use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};

pub type MapFn = fn(&[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;
pub type ReduceFn = fn(&[u8], &[Vec<u8>]) -> Vec<u8>;

/// The original system serializes Python function objects with `marshal` and
/// ships the byte blob alongside the job (§4.4, §9 Open Question: "serialized
/// function" has no Rust equivalent). This crate's escape hatch is a
/// pre-registered table keyed by a short name: a job names its map/reduce
/// step instead of shipping code, and every host that runs a Follower must
/// link the same table.
#[derive(Clone, Default)]
pub struct FunctionTable {
    map_fns: HashMap<String, MapFn>,
    reduce_fns: HashMap<String, ReduceFn>,
}

impl FunctionTable {
    pub fn new() -> Self {
        FunctionTable::default()
    }

    pub fn register_map(&mut self, name: impl Into<String>, f: MapFn) -> &mut Self {
        self.map_fns.insert(name.into(), f);
        self
    }

    pub fn register_reduce(&mut self, name: impl Into<String>, f: ReduceFn) -> &mut Self {
        self.reduce_fns.insert(name.into(), f);
        self
    }

    pub fn map_fn(&self, name: &str) -> CoreResult<MapFn> {
        self.map_fns
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::InvalidInput(format!("unregistered map function {name:?}")))
    }

    pub fn reduce_fn(&self, name: &str) -> CoreResult<ReduceFn> {
        self.reduce_fns
            .get(name)
            .copied()
            .ok_or_else(|| {
                CoreError::InvalidInput(format!("unregistered reduce function {name:?}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word_count_map(chunk: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        String::from_utf8_lossy(chunk)
            .split_whitespace()
            .map(|w| (w.as_bytes().to_vec(), 1u64.to_be_bytes().to_vec()))
            .collect()
    }

    fn sum_reduce(_key: &[u8], values: &[Vec<u8>]) -> Vec<u8> {
        let total: u64 = values
            .iter()
            .map(|v| u64::from_be_bytes(v.as_slice().try_into().unwrap()))
            .sum();
        total.to_be_bytes().to_vec()
    }

    #[test]
    fn registered_functions_are_retrievable_by_name() {
        let mut table = FunctionTable::new();
        table.register_map("word_count", word_count_map);
        table.register_reduce("sum", sum_reduce);

        assert!(table.map_fn("word_count").is_ok());
        assert!(table.reduce_fn("sum").is_ok());
    }

    #[test]
    fn unknown_name_is_an_invalid_input_error() {
        let table = FunctionTable::new();
        assert!(table.map_fn("nope").is_err());
    }
}
