use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use orion_error::prelude::*;

use crate::error::{CoreReason, CoreResult};

/// String key → implementation, populated at startup.
pub struct Registry<T: ?Sized> {
    what: &'static str,
    entries: BTreeMap<String, Arc<T>>,
}

impl<T: ?Sized> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("what", &self.what)
            .field("keys", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<T: ?Sized> Registry<T> {
    /// `what` names the kind of entry in error messages, e.g. `"message_kind"`.
    pub fn new(what: &'static str) -> Self {
        Self {
            what,
            entries: BTreeMap::new(),
        }
    }

    /// Returns `Err` if `key` is already taken.
    pub fn register(&mut self, key: impl Into<String>, entry: Arc<T>) -> CoreResult<()> {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return StructError::from(CoreReason::Config)
                .with_detail(format!("duplicate {} {key:?}", self.what))
                .err();
        }
        self.entries.insert(key, entry);
        Ok(())
    }

    pub fn lookup(&self, key: &str) -> CoreResult<Arc<T>> {
        match self.entries.get(key) {
            Some(entry) => Ok(Arc::clone(entry)),
            None => StructError::from(CoreReason::UnknownKind)
                .with_detail(format!(
                    "unknown {} {key:?} (known: {:?})",
                    self.what,
                    self.entries.keys().collect::<Vec<_>>()
                ))
                .err(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct Hello;
    impl Greeter for Hello {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut reg: Registry<dyn Greeter> = Registry::new("greeter");
        reg.register("hello", Arc::new(Hello)).unwrap();
        assert_eq!(reg.lookup("hello").unwrap().greet(), "hello");
        assert_eq!(reg.keys().collect::<Vec<_>>(), vec!["hello"]);
    }

    #[test]
    fn duplicate_and_unknown_keys_fail() {
        let mut reg: Registry<dyn Greeter> = Registry::new("greeter");
        reg.register("hello", Arc::new(Hello)).unwrap();
        assert!(reg.register("hello", Arc::new(Hello)).is_err());
        assert!(reg.lookup("bye").is_err());
    }
}
