//! samael-backed SAML provider
//!
//! Wraps a `samael` service provider: AuthnRequest construction with the
//! redirect binding, base64 response parsing with signature verification
//! against the IdP metadata certificate, and SP metadata emission. Logout
//! NameID extraction is a plain XML walk; logout requests carry no assertion.

use std::fs;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use quick_xml::Reader;
use quick_xml::events::Event;
use samael::metadata::EntityDescriptor;
use samael::service_provider::{ServiceProvider, ServiceProviderBuilder};
use tracing::debug;

use super::{SamlIdentity, SamlProvider};
use crate::config::SamlProviderConfig;
use crate::{Error, Result};

/// Attribute names accepted as the email claim, in preference order.
const EMAIL_ATTRIBUTES: &[&str] = &[
    "email",
    "mail",
    "urn:oid:0.9.2342.19200300.100.1.3",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress",
];

/// Attribute names accepted as the display-name claim.
const NAME_ATTRIBUTES: &[&str] = &[
    "displayName",
    "cn",
    "urn:oid:2.16.840.1.113730.3.1.241",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name",
];

/// SAML provider backed by the samael service-provider implementation.
pub struct SamaelProvider {
    id: String,
    display_name: String,
    sp: ServiceProvider,
    idp_sso_url: String,
    groups_attribute: Option<String>,
}

impl SamaelProvider {
    /// Build from configuration. IdP metadata may be inline or a file path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when metadata is missing or unparsable.
    pub fn from_config(id: &str, config: &SamlProviderConfig, base_url: &str) -> Result<Self> {
        let metadata_xml = match (&config.idp_metadata_xml, &config.idp_metadata_path) {
            (Some(xml), _) if !xml.trim().is_empty() => xml.clone(),
            (_, Some(path)) => fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("idp_metadata_path unreadable: {e}")))?,
            _ => {
                return Err(Error::Config(
                    "idp_metadata_xml or idp_metadata_path is required".to_string(),
                ));
            }
        };
        if config.idp_sso_url.is_empty() {
            return Err(Error::Config("idp_sso_url is required".to_string()));
        }

        let idp_metadata: EntityDescriptor = samael::metadata::de::from_str(&metadata_xml)
            .map_err(|e| Error::Config(format!("idp metadata: {e}")))?;

        let entity_id = config
            .entity_id
            .clone()
            .unwrap_or_else(|| format!("{base_url}/saml/{id}/metadata"));

        let sp = ServiceProviderBuilder::default()
            .entity_id(entity_id)
            .allow_idp_initiated(false)
            .idp_metadata(idp_metadata)
            .acs_url(format!("{base_url}/saml/{id}/acs"))
            .slo_url(format!("{base_url}/saml/{id}/slo"))
            .build()
            .map_err(|e| Error::Config(format!("service provider: {e}")))?;

        let display_name = if config.display_name.is_empty() {
            id.to_string()
        } else {
            config.display_name.clone()
        };

        Ok(Self {
            id: id.to_string(),
            display_name,
            sp,
            idp_sso_url: config.idp_sso_url.clone(),
            groups_attribute: config.groups_attribute.clone(),
        })
    }
}

#[async_trait::async_trait]
impl SamlProvider for SamaelProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn login_redirect(&self, relay_state: &str) -> Result<(url::Url, String)> {
        let authn_request = self
            .sp
            .make_authentication_request(&self.idp_sso_url)
            .map_err(|e| Error::Internal(format!("authn request: {e}")))?;
        let request_id = authn_request.id.clone();
        let url = authn_request
            .redirect(relay_state)
            .map_err(|e| Error::Internal(format!("redirect binding: {e}")))?
            .ok_or_else(|| Error::Internal("redirect binding produced no URL".to_string()))?;
        debug!(provider = %self.id, request = %request_id, "Built SAML login redirect");
        Ok((url, request_id))
    }

    async fn consume_response(
        &self,
        saml_response: &str,
        request_id: Option<&str>,
    ) -> Result<SamlIdentity> {
        let ids: Vec<&str> = request_id.into_iter().collect();
        let possible_ids = if ids.is_empty() {
            None
        } else {
            Some(ids.as_slice())
        };

        let assertion = self
            .sp
            .parse_base64_response(saml_response, possible_ids)
            .map_err(|e| Error::InvalidRequest(format!("SAML response rejected: {e}")))?;

        let name_id = assertion
            .subject
            .as_ref()
            .and_then(|subject| subject.name_id.as_ref())
            .map(|name_id| name_id.value.clone())
            .ok_or_else(|| Error::InvalidRequest("assertion carries no NameID".to_string()))?;

        let mut email = None;
        let mut name = None;
        let mut groups = Vec::new();

        for statement in assertion.attribute_statements.iter().flatten() {
            for attribute in &statement.attributes {
                let attr_name = attribute.name.as_deref().unwrap_or("");
                let values: Vec<String> = attribute
                    .values
                    .iter()
                    .filter_map(|v| v.value.clone())
                    .collect();
                if values.is_empty() {
                    continue;
                }

                if email.is_none() && EMAIL_ATTRIBUTES.contains(&attr_name) {
                    email = Some(values[0].clone());
                } else if name.is_none() && NAME_ATTRIBUTES.contains(&attr_name) {
                    name = Some(values[0].clone());
                } else if self.groups_attribute.as_deref() == Some(attr_name) {
                    groups = values;
                }
            }
        }

        // NameID is commonly the email itself when no attribute spells it out
        let email = email.unwrap_or_else(|| name_id.clone());

        Ok(SamlIdentity {
            name_id,
            email,
            name,
            groups,
        })
    }

    fn sp_metadata(&self) -> Result<String> {
        self.sp
            .metadata()
            .map_err(|e| Error::Internal(format!("sp metadata: {e}")))?
            .to_xml()
            .map_err(|e| Error::Internal(format!("sp metadata xml: {e}")))
    }

    fn logout_name_id(&self, saml_request: &str) -> Result<String> {
        let xml = STANDARD
            .decode(saml_request.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_else(|| saml_request.to_string());
        extract_name_id(&xml)
    }
}

/// Pull the NameID text out of a LogoutRequest document.
fn extract_name_id(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) if element.local_name().as_ref() == b"NameID" => {
                let text = reader
                    .read_text(element.name())
                    .map_err(|e| Error::InvalidRequest(format!("logout request: {e}")))?;
                let value = text.trim().to_string();
                if value.is_empty() {
                    return Err(Error::InvalidRequest(
                        "logout request NameID is empty".to_string(),
                    ));
                }
                return Ok(value);
            }
            Ok(Event::Eof) => {
                return Err(Error::InvalidRequest(
                    "logout request carries no NameID".to_string(),
                ));
            }
            Ok(_) => {}
            Err(e) => {
                return Err(Error::InvalidRequest(format!("logout request xml: {e}")));
            }
        }
    }
}
