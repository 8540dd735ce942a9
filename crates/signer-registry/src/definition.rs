//! Token definitions: how a token presents itself to the registry.
//!
//! The software token has a fixed identity. A hardware token is identified
//! by its module, serial number, label and slot index, which together build
//! its external id.

use std::collections::BTreeMap;

use crate::model::{KeyAlgorithm, SignMechanism, SOFTWARE_MODULE_TYPE, SOFTWARE_TOKEN_ID};

/// Description of a token as announced by its driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenDefinition {
    Software {
        /// Signing mechanism per supported key algorithm.
        sign_mechanisms: BTreeMap<KeyAlgorithm, SignMechanism>,
    },
    Hardware {
        module_type: String,
        serial_number: String,
        label: String,
        slot_index: i32,
        read_only: bool,
        sign_mechanism: SignMechanism,
        batch_signing_enabled: bool,
    },
}

impl TokenDefinition {
    /// Software token signing with `mechanism` for RSA keys.
    pub fn software(mechanism: SignMechanism) -> Self {
        let mut sign_mechanisms = BTreeMap::new();
        sign_mechanisms.insert(KeyAlgorithm::Rsa, mechanism);
        Self::Software { sign_mechanisms }
    }

    pub fn id(&self) -> String {
        match self {
            Self::Software { .. } => SOFTWARE_TOKEN_ID.to_string(),
            Self::Hardware {
                module_type,
                serial_number,
                label,
                slot_index,
                ..
            } => format!("{}-{}-{}-{}", module_type, serial_number, label, slot_index),
        }
    }

    pub fn module_type(&self) -> &str {
        match self {
            Self::Software { .. } => SOFTWARE_MODULE_TYPE,
            Self::Hardware { module_type, .. } => module_type,
        }
    }

    /// Label stored with the token.
    pub fn label(&self) -> String {
        match self {
            Self::Software { .. } => format!("{}-{}", SOFTWARE_MODULE_TYPE, SOFTWARE_TOKEN_ID),
            Self::Hardware { label, .. } => label.clone(),
        }
    }

    /// Name shown to operators until they rename the token.
    pub fn friendly_name(&self) -> String {
        match self {
            Self::Software { .. } => self.label(),
            Self::Hardware {
                module_type,
                serial_number,
                label,
                ..
            } => format!("{}-{}-{}", module_type, serial_number, label),
        }
    }

    pub fn serial_number(&self) -> Option<&str> {
        match self {
            Self::Software { .. } => None,
            Self::Hardware { serial_number, .. } => Some(serial_number),
        }
    }

    pub fn slot_index(&self) -> i32 {
        match self {
            Self::Software { .. } => 0,
            Self::Hardware { slot_index, .. } => *slot_index,
        }
    }

    pub fn read_only(&self) -> bool {
        match self {
            Self::Software { .. } => false,
            Self::Hardware { read_only, .. } => *read_only,
        }
    }

    /// Mechanism the token signs with by default.
    pub fn sign_mechanism(&self) -> SignMechanism {
        match self {
            Self::Software { sign_mechanisms } => sign_mechanisms
                .get(&KeyAlgorithm::Rsa)
                .or_else(|| sign_mechanisms.values().next())
                .copied()
                .unwrap_or_default(),
            Self::Hardware { sign_mechanism, .. } => *sign_mechanism,
        }
    }

    /// The software token always batches; hardware tokens decide per module.
    pub fn batch_signing_enabled(&self) -> bool {
        match self {
            Self::Software { .. } => true,
            Self::Hardware {
                batch_signing_enabled,
                ..
            } => *batch_signing_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hardware() -> TokenDefinition {
        TokenDefinition::Hardware {
            module_type: "softhsm".to_string(),
            serial_number: "1234".to_string(),
            label: "xrd".to_string(),
            slot_index: 2,
            read_only: true,
            sign_mechanism: SignMechanism::Ecdsa,
            batch_signing_enabled: false,
        }
    }

    #[test]
    fn test_software_identity() {
        let definition = TokenDefinition::software(SignMechanism::RsaPkcs);
        assert_eq!(definition.id(), "0");
        assert_eq!(definition.module_type(), "softToken");
        assert_eq!(definition.label(), "softToken-0");
        assert_eq!(definition.friendly_name(), "softToken-0");
        assert_eq!(definition.sign_mechanism(), SignMechanism::RsaPkcs);
        assert!(definition.batch_signing_enabled());
        assert!(definition.serial_number().is_none());
    }

    #[test]
    fn test_hardware_identity() {
        let definition = hardware();
        assert_eq!(definition.id(), "softhsm-1234-xrd-2");
        assert_eq!(definition.label(), "xrd");
        assert_eq!(definition.friendly_name(), "softhsm-1234-xrd");
        assert_eq!(definition.serial_number(), Some("1234"));
        assert_eq!(definition.slot_index(), 2);
        assert!(definition.read_only());
        assert_eq!(definition.sign_mechanism(), SignMechanism::Ecdsa);
    }
}
