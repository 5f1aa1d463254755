use crate::{
    convert::{
        ConvertError, PassthroughConverter, RotationConverter, UintTextConverter, ValueConverter,
    },
    error::{ErrorClass, ErrorDetail, ErrorOrigin, InternalError},
    value::Value,
};
use std::{collections::BTreeMap, fmt, sync::Arc};
use thiserror::Error as ThisError;

///
/// ConverterRegistryError
///

#[derive(Debug, ThisError)]
pub enum ConverterRegistryError {
    #[error("converter '{0}' not found")]
    ConverterNotFound(String),

    #[error("converter '{0}' already registered")]
    ConverterAlreadyRegistered(String),
}

impl ConverterRegistryError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::ConverterNotFound(_) => ErrorClass::NotFound,
            Self::ConverterAlreadyRegistered(_) => ErrorClass::Conflict,
        }
    }
}

impl From<ConverterRegistryError> for InternalError {
    fn from(err: ConverterRegistryError) -> Self {
        Self::with_detail(
            err.class(),
            ErrorOrigin::Convert,
            ErrorDetail::ConverterRegistry(err),
        )
    }
}

///
/// ConverterRegistry
///
/// Name → converter mapping. Populated while metadata is assembled and
/// read-only once it is moved into [`Metadata`](crate::metadata::Metadata).
///

#[derive(Clone, Default)]
pub struct ConverterRegistry {
    converters: BTreeMap<String, Arc<dyn ValueConverter>>,
}

impl ConverterRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the builtin converters
    /// (`passthrough`, `rot13`, `uint_text`).
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut converters: BTreeMap<String, Arc<dyn ValueConverter>> = BTreeMap::new();
        converters.insert(
            PassthroughConverter::NAME.to_string(),
            Arc::new(PassthroughConverter),
        );
        converters.insert(
            RotationConverter::ROT13.to_string(),
            Arc::new(RotationConverter::rot13()),
        );
        converters.insert(
            UintTextConverter::NAME.to_string(),
            Arc::new(UintTextConverter),
        );

        Self { converters }
    }

    /// Register a converter under its own name.
    pub fn register(
        &mut self,
        converter: impl ValueConverter + 'static,
    ) -> Result<(), ConverterRegistryError> {
        let name = converter.name().to_string();

        self.register_as(&name, converter)
    }

    /// Register a converter under an explicit alias. The alias is the name
    /// reported by the converter and its errors.
    pub fn register_as(
        &mut self,
        name: &str,
        converter: impl ValueConverter + 'static,
    ) -> Result<(), ConverterRegistryError> {
        if self.converters.contains_key(name) {
            return Err(ConverterRegistryError::ConverterAlreadyRegistered(
                name.to_string(),
            ));
        }

        let converter: Arc<dyn ValueConverter> = if converter.name() == name {
            Arc::new(converter)
        } else {
            Arc::new(Aliased {
                name: name.to_string(),
                inner: converter,
            })
        };

        self.converters.insert(name.to_string(), converter);
        Ok(())
    }

    /// Look up a converter by name.
    pub fn get(&self, name: &str) -> Result<&dyn ValueConverter, ConverterRegistryError> {
        self.converters
            .get(name)
            .map(|converter| &**converter)
            .ok_or_else(|| ConverterRegistryError::ConverterNotFound(name.to_string()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.converters.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.converters.keys().map(String::as_str)
    }
}

///
/// Aliased
///

struct Aliased<C> {
    name: String,
    inner: C,
}

impl<C: ValueConverter> ValueConverter for Aliased<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn to_storage(&self, value: &Value) -> Result<Value, ConvertError> {
        self.inner
            .to_storage(value)
            .map_err(|err| err.renamed(&self.name))
    }

    fn to_application(&self, value: &Value) -> Result<Value, ConvertError> {
        self.inner
            .to_application(value)
            .map_err(|err| err.renamed(&self.name))
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}
