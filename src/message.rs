//! MIME decoding of submitted messages

use crate::error::MessageParseError;

use mailparse::{DispositionType, MailAddr, MailHeaderMap, ParsedMail, addrparse_header};

/// A file carried by the message, already transfer-decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAttachment {
    pub filename: String,
    pub content: Vec<u8>,
}

/// The parts of a message the relay forwards
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMessage {
    pub subject: String,
    pub text_body: String,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub attachments: Vec<ParsedAttachment>,
}

pub trait MessageParser: Send + Sync {
    fn parse(&self, raw: &[u8]) -> Result<ParsedMessage, MessageParseError>;
}

/// [`MessageParser`] backed by the `mailparse` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct MailParser;

impl MessageParser for MailParser {
    fn parse(&self, raw: &[u8]) -> Result<ParsedMessage, MessageParseError> {
        let mail = mailparse::parse_mail(raw)?;
        let headers = mail.get_headers();

        let mut message = ParsedMessage {
            subject: headers.get_first_value("Subject").unwrap_or_default(),
            cc: addresses(&mail, "Cc")?,
            bcc: addresses(&mail, "Bcc")?,
            ..ParsedMessage::default()
        };

        let mut text_body = None;
        collect_parts(&mail, &mut text_body, &mut message.attachments)?;
        message.text_body = text_body.unwrap_or_default();

        Ok(message)
    }
}

/// Bare addresses from every occurrence of `name`, groups flattened
fn addresses(mail: &ParsedMail<'_>, name: &str) -> Result<Vec<String>, MessageParseError> {
    let mut result = Vec::new();
    for header in mail.get_headers().get_all_headers(name) {
        for addr in addrparse_header(header)?.iter() {
            match addr {
                MailAddr::Single(info) => result.push(info.addr.clone()),
                MailAddr::Group(group) => {
                    result.extend(group.addrs.iter().map(|info| info.addr.clone()))
                }
            }
        }
    }
    Ok(result)
}

fn collect_parts(
    part: &ParsedMail<'_>,
    text_body: &mut Option<String>,
    attachments: &mut Vec<ParsedAttachment>,
) -> Result<(), MessageParseError> {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_parts(sub, text_body, attachments)?;
        }
        return Ok(());
    }

    let disposition = part.get_content_disposition();
    if disposition.disposition == DispositionType::Attachment {
        let filename = disposition
            .params
            .get("filename")
            .or_else(|| part.ctype.params.get("name"))
            .cloned()
            .unwrap_or_default();
        attachments.push(ParsedAttachment {
            filename,
            content: part.get_body_raw()?,
        });
    } else if text_body.is_none() && part.ctype.mimetype.eq_ignore_ascii_case("text/plain") {
        *text_body = Some(part.get_body()?);
    }

    Ok(())
}
