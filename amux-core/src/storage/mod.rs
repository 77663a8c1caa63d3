pub mod selector_store;
