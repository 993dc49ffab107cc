//! HTTP lookups that work without an open socket.

use reqwest::header::{LOCATION, ORIGIN};
use reqwest::redirect::Policy;
use url::Url;

use crate::error::WaError;
use crate::socket::endpoints;
use crate::types::JID;

/// Check whether a phone number is registered, without a connection.
///
/// `wa.me` answers with a redirect; a `Location` path ending in `send/`
/// carries the canonical number in its `phone` query parameter.
pub async fn is_on_whatsapp_noconn(phone: &str) -> Result<Option<JID>, WaError> {
    let client = reqwest::Client::builder()
        .redirect(Policy::none())
        .build()
        .map_err(|e| WaError::Http(e.to_string()))?;

    let response = client
        .get(format!("https://wa.me/{phone}"))
        .header(ORIGIN, endpoints::ORIGIN)
        .send()
        .await
        .map_err(|e| WaError::Http(e.to_string()))?;

    let Some(location) = response.headers().get(LOCATION) else {
        return Ok(None);
    };
    let location = location
        .to_str()
        .map_err(|e| WaError::Http(e.to_string()))?;

    Ok(parse_send_redirect(location))
}

fn parse_send_redirect(location: &str) -> Option<JID> {
    let url = Url::parse(location).ok()?;
    if !url.path().ends_with("send/") {
        return None;
    }
    let phone = url
        .query_pairs()
        .find(|(key, _)| key == "phone")
        .map(|(_, value)| value.into_owned())?;
    Some(JID::from_phone(phone))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_redirect_yields_jid() {
        let jid =
            parse_send_redirect("https://api.whatsapp.com/send/?phone=15551234567&type=phone_number")
                .unwrap();
        assert_eq!(jid.to_string(), "15551234567@s.whatsapp.net");
    }

    #[test]
    fn test_non_send_redirect_is_unregistered() {
        assert!(parse_send_redirect("https://www.whatsapp.com/").is_none());
    }

    #[test]
    fn test_missing_phone_param() {
        assert!(parse_send_redirect("https://api.whatsapp.com/send/?type=phone_number").is_none());
    }

    #[test]
    fn test_unparseable_location() {
        assert!(parse_send_redirect("not a url").is_none());
    }
}
