//! Minimal XML-RPC wire codec
//!
//! Renders method calls and parses method responses for the handful of value
//! types the NEOS interface actually uses: integers, strings, base64 blobs,
//! arrays, and the struct carried by fault responses. Anything else in a
//! response is a malformed-response error rather than a silent skip.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use quick_xml::Reader;
use quick_xml::events::Event;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    /// The server answered with an XML-RPC fault
    #[error("server fault {code}: {message}")]
    Fault { code: i32, message: String },

    /// The response could not be understood as XML-RPC
    #[error("malformed XML-RPC response: {0}")]
    Malformed(String),
}

/// An XML-RPC value, restricted to the types the NEOS methods exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    String(String),
    Base64(Vec<u8>),
    Array(Vec<Value>),
    Struct(Vec<(String, Value)>),
}

/// Render a complete `<methodCall>` document.
pub fn render_call(method: &str, params: &[Value]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    xml.push_str(&escape_xml(method));
    xml.push_str("</methodName><params>");
    for param in params {
        xml.push_str("<param>");
        render_value(&mut xml, param);
        xml.push_str("</param>");
    }
    xml.push_str("</params></methodCall>");
    xml
}

fn render_value(out: &mut String, value: &Value) {
    out.push_str("<value>");
    match value {
        Value::Int(i) => {
            out.push_str("<int>");
            out.push_str(&i.to_string());
            out.push_str("</int>");
        }
        Value::String(s) => {
            out.push_str("<string>");
            out.push_str(&escape_xml(s));
            out.push_str("</string>");
        }
        Value::Base64(bytes) => {
            out.push_str("<base64>");
            out.push_str(&BASE64.encode(bytes));
            out.push_str("</base64>");
        }
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                render_value(out, item);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member><name>");
                out.push_str(&escape_xml(name));
                out.push_str("</name>");
                render_value(out, member);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
    }
    out.push_str("</value>");
}

fn escape_xml(raw: &str) -> String {
    raw.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Parse a `<methodResponse>` document into its single return value, or the
/// fault it carries.
pub fn parse_response(xml: &str) -> Result<Value, RpcError> {
    let mut reader = Reader::from_str(xml);
    let mut in_fault = false;
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => match e.name().as_ref() {
                b"fault" => in_fault = true,
                b"value" => {
                    let value = parse_value(&mut reader)?;
                    return if in_fault { Err(fault_from(value)) } else { Ok(value) };
                }
                _ => {}
            },
            Event::Eof => return Err(malformed("response contains no value")),
            _ => {}
        }
    }
}

/// Parse one value; the reader is positioned just past `<value>` and is left
/// just past the matching `</value>`.
fn parse_value(reader: &mut Reader<&[u8]>) -> Result<Value, RpcError> {
    let mut text = String::new();
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => {
                let tag = e.name().as_ref().to_vec();
                let value = match tag.as_slice() {
                    b"int" | b"i4" => {
                        let raw = read_scalar(reader, &tag)?;
                        let parsed = raw
                            .trim()
                            .parse()
                            .map_err(|_| malformed(format!("invalid integer '{raw}'")))?;
                        Value::Int(parsed)
                    }
                    b"string" => Value::String(read_scalar(reader, &tag)?),
                    b"base64" => {
                        let raw = read_scalar(reader, &tag)?;
                        // The payload may be line-wrapped; the codec is not.
                        let cleaned: String =
                            raw.chars().filter(|c| !c.is_ascii_whitespace()).collect();
                        let bytes = BASE64
                            .decode(cleaned.as_bytes())
                            .map_err(|err| malformed(format!("invalid base64 payload: {err}")))?;
                        Value::Base64(bytes)
                    }
                    b"boolean" | b"double" | b"dateTime.iso8601" => {
                        Value::String(read_scalar(reader, &tag)?)
                    }
                    b"array" => parse_array(reader)?,
                    b"struct" => parse_struct(reader)?,
                    other => {
                        return Err(malformed(format!(
                            "unsupported value type <{}>",
                            String::from_utf8_lossy(other)
                        )));
                    }
                };
                finish_value(reader)?;
                return Ok(value);
            }
            Event::Empty(_) => {
                finish_value(reader)?;
                return Ok(Value::String(String::new()));
            }
            Event::Text(t) => text.push_str(&t.unescape().map_err(malformed)?),
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c.into_inner())),
            // A value with no type element is a string.
            Event::End(e) if e.name().as_ref() == b"value" => return Ok(Value::String(text)),
            Event::Eof => return Err(malformed("unexpected end of response in value")),
            _ => {}
        }
    }
}

/// Accumulate the text content of a scalar element up to its closing tag.
fn read_scalar(reader: &mut Reader<&[u8]>, tag: &[u8]) -> Result<String, RpcError> {
    let mut text = String::new();
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Text(t) => text.push_str(&t.unescape().map_err(malformed)?),
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c.into_inner())),
            Event::End(e) if e.name().as_ref() == tag => return Ok(text),
            Event::Eof => return Err(malformed("unexpected end of response in scalar")),
            _ => {
                return Err(malformed(format!(
                    "unexpected markup inside <{}>",
                    String::from_utf8_lossy(tag)
                )));
            }
        }
    }
}

/// Consume whitespace and the closing `</value>` after a typed value.
fn finish_value(reader: &mut Reader<&[u8]>) -> Result<(), RpcError> {
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Text(_) => {}
            Event::End(e) if e.name().as_ref() == b"value" => return Ok(()),
            Event::Eof => return Err(malformed("unexpected end of response after value")),
            _ => return Err(malformed("unexpected markup after typed value")),
        }
    }
}

fn parse_array(reader: &mut Reader<&[u8]>) -> Result<Value, RpcError> {
    let mut items = Vec::new();
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => match e.name().as_ref() {
                b"data" => {}
                b"value" => items.push(parse_value(reader)?),
                other => {
                    return Err(malformed(format!(
                        "unexpected <{}> inside array",
                        String::from_utf8_lossy(other)
                    )));
                }
            },
            Event::Empty(e) if e.name().as_ref() == b"value" => {
                items.push(Value::String(String::new()));
            }
            Event::End(e) => match e.name().as_ref() {
                b"data" => {}
                b"array" => return Ok(Value::Array(items)),
                other => {
                    return Err(malformed(format!(
                        "unexpected </{}> inside array",
                        String::from_utf8_lossy(other)
                    )));
                }
            },
            Event::Eof => return Err(malformed("unexpected end of response in array")),
            _ => {}
        }
    }
}

fn parse_struct(reader: &mut Reader<&[u8]>) -> Result<Value, RpcError> {
    let mut members = Vec::new();
    let mut name: Option<String> = None;
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => {
                let tag = e.name().as_ref().to_vec();
                match tag.as_slice() {
                    b"member" => name = None,
                    b"name" => name = Some(read_scalar(reader, b"name")?),
                    b"value" => {
                        let value = parse_value(reader)?;
                        members.push((name.take().unwrap_or_default(), value));
                    }
                    _ => {}
                }
            }
            Event::End(e) if e.name().as_ref() == b"struct" => return Ok(Value::Struct(members)),
            Event::Eof => return Err(malformed("unexpected end of response in struct")),
            _ => {}
        }
    }
}

fn fault_from(value: Value) -> RpcError {
    let Value::Struct(members) = value else {
        return malformed("fault without struct payload");
    };
    let mut code = 0;
    let mut message = String::new();
    for (name, member) in members {
        match (name.as_str(), member) {
            ("faultCode", Value::Int(c)) => code = c,
            ("faultString", Value::String(s)) => message = s,
            _ => {}
        }
    }
    RpcError::Fault { code, message }
}

fn malformed(detail: impl std::fmt::Display) -> RpcError {
    RpcError::Malformed(detail.to_string())
}
