//! Client certificates as handed over by the TLS layer.
//!
//! A [`ClientCertificate`] is decoded once per connection from the DER bytes of the
//! leaf certificate the peer presented. Distinguished names are rendered with the
//! most specific RDN first (`CN=Bob, O=Web API Book`), which is the form issuer
//! allow-lists and authorization rules are written in.

use crate::gate::Error;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::CertificateDer;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use x509_parser::asn1_rs::{Any, Tag};
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::oid_registry::{
    Oid, OID_PKCS9_EMAIL_ADDRESS, OID_X509_COMMON_NAME, OID_X509_COUNTRY_NAME,
    OID_X509_LOCALITY_NAME, OID_X509_ORGANIZATIONAL_UNIT, OID_X509_ORGANIZATION_NAME,
    OID_X509_STATE_OR_PROVINCE_NAME,
};
use x509_parser::prelude::FromDer;
use x509_parser::x509::X509Name;

/// Identity information extracted from a client X.509 certificate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClientCertificate {
    pub subject_name: String,
    pub issuer_name: String,
    /// First SAN `rfc822Name`, falling back to the subject `emailAddress` attribute.
    pub email_address: Option<String>,
    pub common_name: Option<String>,
    pub dns_names: Vec<String>,
    /// DER encoding as presented by the peer.
    #[serde(with = "hex_bytes")]
    pub raw: Vec<u8>,
}

impl ClientCertificate {
    #[instrument(skip(der), fields(len = der.len()))]
    pub fn from_der(der: &[u8]) -> Result<Self, Error> {
        let (_, cert) = X509Certificate::from_der(der)?;

        let subject_name = format_distinguished_name(cert.subject());
        let issuer_name = format_distinguished_name(cert.issuer());

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| attribute_text(cn.attr_value()));

        let mut san_emails = Vec::new();
        let mut dns_names = Vec::new();
        if let Some(san) = cert.subject_alternative_name()? {
            for name in &san.value.general_names {
                match name {
                    GeneralName::RFC822Name(email) => san_emails.push((*email).to_string()),
                    GeneralName::DNSName(dns) => dns_names.push((*dns).to_string()),
                    _ => {}
                }
            }
        }

        let email_address = match san_emails.into_iter().next() {
            Some(email) => Some(email),
            None => cert
                .subject()
                .iter_email()
                .next()
                .and_then(|email| attribute_text(email.attr_value())),
        };

        debug!(
            subject = %subject_name,
            issuer = %issuer_name,
            "Decoded client certificate"
        );

        Ok(Self {
            subject_name,
            issuer_name,
            email_address,
            common_name,
            dns_names,
            raw: der.to_vec(),
        })
    }

    /// Hex encoded SHA-256 of the DER encoding, empty when no bytes are held.
    pub fn thumbprint(&self) -> String {
        if self.raw.is_empty() {
            return String::new();
        }
        hex::encode(Sha256::digest(&self.raw))
    }

    /// Decodes the first `CERTIFICATE` block of a PEM document.
    pub fn from_pem(pem: &[u8]) -> Result<Self, Error> {
        let der = CertificateDer::from_pem_slice(pem)?;
        Self::from_der(der.as_ref())
    }
}

mod hex_bytes {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }
}

fn attribute_key(oid: &Oid) -> String {
    let known = [
        (&OID_X509_COMMON_NAME, "CN"),
        (&OID_X509_ORGANIZATIONAL_UNIT, "OU"),
        (&OID_X509_ORGANIZATION_NAME, "O"),
        (&OID_X509_LOCALITY_NAME, "L"),
        (&OID_X509_STATE_OR_PROVINCE_NAME, "S"),
        (&OID_X509_COUNTRY_NAME, "C"),
        (&OID_PKCS9_EMAIL_ADDRESS, "E"),
    ];

    known
        .iter()
        .find(|(known_oid, _)| *known_oid == oid)
        .map_or_else(|| oid.to_id_string(), |(_, key)| (*key).to_string())
}

/// Decodes a string-typed attribute value. `None` when the value has no text form.
fn attribute_text(value: &Any) -> Option<String> {
    match value.tag() {
        Tag::BmpString => {
            if value.data.len() % 2 != 0 {
                return None;
            }
            let units = value
                .data
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect::<Vec<_>>();
            String::from_utf16(&units).ok()
        }
        Tag::NumericString
        | Tag::VisibleString
        | Tag::PrintableString
        | Tag::GeneralString
        | Tag::GraphicString
        | Tag::T61String
        | Tag::VideotexString
        | Tag::Utf8String
        | Tag::Ia5String => std::str::from_utf8(value.data).ok().map(String::from),
        _ => None,
    }
}

fn escape_attribute_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for (index, c) in value.chars().enumerate() {
        if matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';') || (index == 0 && c == '#') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Renders a name with the most specific RDN first, `KEY=value` pairs joined by `", "`.
///
/// Values without a text form are rendered as `#` followed by their hex encoded contents.
pub fn format_distinguished_name(name: &X509Name) -> String {
    let mut rdns = Vec::new();
    for rdn in name.iter_rdn() {
        let mut attributes = Vec::new();
        for attribute in rdn.iter() {
            let value = attribute_text(attribute.attr_value()).map_or_else(
                || format!("#{}", hex::encode_upper(attribute.attr_value().as_bytes())),
                |text| escape_attribute_value(&text),
            );
            attributes.push(format!("{}={value}", attribute_key(attribute.attr_type())));
        }
        rdns.push(attributes.join(" + "));
    }
    rdns.reverse();
    rdns.join(", ")
}

/// Canonical form used to compare distinguished names written by hand against
/// names decoded from certificates.
///
/// Whitespace around separators is dropped and attribute keys are upper-cased;
/// attribute values are compared as written.
pub fn normalize_distinguished_name(dn: &str) -> String {
    let mut components = Vec::new();
    let mut current = String::new();
    let mut escaped = false;

    for c in dn.chars() {
        if escaped {
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            current.push(c);
            escaped = true;
        } else if c == ',' {
            components.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    components.push(current);

    components
        .iter()
        .map(|component| component.trim())
        .filter(|component| !component.is_empty())
        .map(|component| match component.split_once('=') {
            Some((key, value)) => {
                let key = key.trim().to_ascii_uppercase();
                let key = match key.as_str() {
                    "EMAILADDRESS" => "E".to_string(),
                    "ST" => "S".to_string(),
                    _ => key,
                };
                format!("{key}={}", value.trim())
            }
            None => component.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub const DEMO_CA_ISSUER: &str = "CN=Demo Certification Authority, O=Web API Book";

    pub const DEMO_CA: &str = include_str!("../../tests/fixtures/demo-ca.pem");
    pub const BOB: &str = include_str!("../../tests/fixtures/bob.pem");
    pub const ALICE: &str = include_str!("../../tests/fixtures/alice.pem");
    pub const CAROL: &str = include_str!("../../tests/fixtures/carol.pem");
    pub const MALLORY: &str = include_str!("../../tests/fixtures/mallory.pem");
    pub const SERVICE: &str = include_str!("../../tests/fixtures/service.pem");
    pub const ZOE_BMP: &str = include_str!("../../tests/fixtures/bmp.pem");
    pub const FORGED: &str = include_str!("../../tests/fixtures/forged.pem");

    pub fn load(pem: &str) -> super::ClientCertificate {
        super::ClientCertificate::from_pem(pem.as_bytes()).unwrap()
    }
}
