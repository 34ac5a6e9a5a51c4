use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::backend::{BackendError, BackendReply};
use crate::models::UserData;

// ============================================================================
// SOAP Envelopes
// ============================================================================

pub(super) const KYC_NAMESPACE: &str = "http://example.com/kyc";

const ENVELOPE_OPEN: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns="http://example.com/kyc">
  <soapenv:Header>
    <KYCRequest xmlns="http://example.com/kyc"/>
  </soapenv:Header>
  <soapenv:Body>
"#;

const ENVELOPE_CLOSE: &str = r#"  </soapenv:Body>
</soapenv:Envelope>"#;

/// One SOAP operation exposed by the KYC service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SoapOperation {
    Query,
    Create,
    Update,
    Delete,
}

impl SoapOperation {
    /// Request element, also the last segment of the SOAPAction.
    pub fn element(&self) -> &'static str {
        match self {
            SoapOperation::Query => "KYCQuery",
            SoapOperation::Create => "CreateKYC",
            SoapOperation::Update => "UpdateKYC",
            SoapOperation::Delete => "DeleteKYC",
        }
    }

    pub fn action(&self) -> String {
        format!("{}/{}", KYC_NAMESPACE, self.element())
    }

    pub fn response_element(&self) -> &'static str {
        match self {
            SoapOperation::Delete => "DeleteKYCResponse",
            _ => "KYCResponse",
        }
    }
}

pub(super) fn client_id_request(operation: SoapOperation, client_id: &str) -> String {
    format!(
        "{open}    <{el} xmlns=\"{ns}\">\n      <ClientID>{id}</ClientID>\n    </{el}>\n{close}",
        open = ENVELOPE_OPEN,
        el = operation.element(),
        ns = KYC_NAMESPACE,
        id = escape(client_id),
        close = ENVELOPE_CLOSE,
    )
}

pub(super) fn user_data_request(operation: SoapOperation, user: &UserData) -> String {
    format!(
        "{open}    <{el} xmlns=\"{ns}\">\n      <UserData>\n        <ClientID>{id}</ClientID>\n        <Risk>{risk}</Risk>\n      </UserData>\n    </{el}>\n{close}",
        open = ENVELOPE_OPEN,
        el = operation.element(),
        ns = KYC_NAMESPACE,
        id = escape(user.client_id.as_str()),
        risk = user.risk,
        close = ENVELOPE_CLOSE,
    )
}

/// Parse a response envelope, matching elements by local name.
///
/// `Status`/`Message` directly under the result element describe the call;
/// the same names nested in `UserData` belong to the record.
pub(super) fn parse_response(body: &str, result_element: &str) -> Result<BackendReply, BackendError> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut found = false;
    let mut reply = BackendReply::default();
    let mut user: Option<UserData> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == result_element {
                    found = true;
                } else if name == "UserData" && path.last().map(String::as_str) == Some(result_element) {
                    user = Some(UserData::default());
                }
                path.push(name);
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == result_element.as_bytes() {
                    found = true;
                }
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(text)) => {
                let text = text
                    .unescape()
                    .map_err(|e| BackendError::MalformedResponse(format!("invalid text content: {e}")))?;
                assign_field(&path, result_element, &text, &mut reply, &mut user)?;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(BackendError::MalformedResponse(format!("invalid XML: {e}")));
            }
            _ => {}
        }
    }

    if !found {
        return Err(BackendError::MalformedResponse(format!(
            "response has no {result_element} element"
        )));
    }

    reply.user_data = user;
    Ok(reply)
}

fn assign_field(
    path: &[String],
    result_element: &str,
    text: &str,
    reply: &mut BackendReply,
    user: &mut Option<UserData>,
) -> Result<(), BackendError> {
    let depth = path.len();
    if depth < 2 {
        return Ok(());
    }
    let field = path[depth - 1].as_str();
    let parent = path[depth - 2].as_str();

    if parent == result_element {
        match field {
            "Status" => reply.status = text.to_string(),
            "Message" => reply.message = text.to_string(),
            _ => {}
        }
        return Ok(());
    }

    let in_user_data = parent == "UserData" && depth >= 3 && path[depth - 3] == result_element;
    if let (true, Some(user)) = (in_user_data, user.as_mut()) {
        match field {
            "ClientID" => user.client_id = text.to_string(),
            "Risk" => {
                // JSON has no NaN or infinity, so they could not be published.
                user.risk = text
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|risk| risk.is_finite())
                    .ok_or_else(|| BackendError::MalformedResponse(format!("Risk is not a finite number: {text:?}")))?;
            }
            "Status" => user.status = text.to_string(),
            "Message" => user.message = text.to_string(),
            _ => {}
        }
    }

    Ok(())
}
