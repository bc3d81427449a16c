pub mod selector_test;
