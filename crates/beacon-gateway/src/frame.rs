use uuid::Uuid;

const DELIMITER: char = '|';
const RECEIPT_DISCRIMINATOR: char = 'r';

/// A decoded inbound chat-socket frame. Parsing is total: anything that
/// does not match a known shape becomes `Malformed`, which the session
/// logs and drops without touching the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `<roomId>|<content...>` — content may itself contain the delimiter.
    Chat { room_id: Uuid, content: String },
    /// `r<messageId>|<roomId>`
    Receipt { message_id: Uuid, room_id: Uuid },
    Malformed,
}

impl Frame {
    pub fn parse(text: &str) -> Frame {
        match text.strip_prefix(RECEIPT_DISCRIMINATOR) {
            Some(body) => parse_receipt(body),
            // Chat is the default: any other leading character starts a
            // room id.
            None => parse_chat(text),
        }
    }
}

fn parse_chat(body: &str) -> Frame {
    let Some((room_id, content)) = body.split_once(DELIMITER) else {
        return Frame::Malformed;
    };

    match room_id.parse() {
        Ok(room_id) => Frame::Chat {
            room_id,
            // split_once leaves the rest untouched, so delimiters inside
            // the content survive.
            content: content.to_string(),
        },
        Err(_) => Frame::Malformed,
    }
}

fn parse_receipt(body: &str) -> Frame {
    let mut parts = body.split(DELIMITER);
    let (Some(message_id), Some(room_id), None) = (parts.next(), parts.next(), parts.next())
    else {
        return Frame::Malformed;
    };

    match (message_id.parse(), room_id.parse()) {
        (Ok(message_id), Ok(room_id)) => Frame::Receipt {
            message_id,
            room_id,
        },
        _ => Frame::Malformed,
    }
}

/// Inbound frames on the notification socket: a discriminator followed by
/// a notification id, or an empty frame to hang up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyFrame {
    MarkRead(Uuid),
    Delete(Uuid),
    Close,
    Malformed,
}

impl NotifyFrame {
    pub fn parse(text: &str) -> NotifyFrame {
        let mut chars = text.chars();
        let Some(discriminator) = chars.next() else {
            return NotifyFrame::Close;
        };

        let id = match chars.as_str().parse() {
            Ok(id) => id,
            Err(_) => return NotifyFrame::Malformed,
        };

        match discriminator {
            'r' => NotifyFrame::MarkRead(id),
            'd' => NotifyFrame::Delete(id),
            _ => NotifyFrame::Malformed,
        }
    }
}
