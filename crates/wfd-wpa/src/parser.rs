use std::cmp::Ordering;

use crate::WpaError;

/// Longest textual MAC address, six two-digit groups.
pub const MAC_STRLEN: usize = 17;

/// Log priority the supplicant prefixes to unsolicited events.
///
/// Anything missing, out of range or mangled folds to `Msgdump`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    #[default]
    Msgdump,
    Debug,
    Info,
    Warning,
    Error,
}

impl Priority {
    fn from_digit(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::Msgdump,
            1 => Self::Debug,
            2 => Self::Info,
            3 => Self::Warning,
            4 => Self::Error,
            _ => None?,
        })
    }
}

/// Tag of an unsolicited supplicant event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventId {
    Unknown,
    ApStaConnected,
    ApStaDisconnected,
    P2pDeviceFound,
    P2pGoNegRequest,
    P2pGoNegSuccess,
    P2pGoNegFailure,
    P2pGroupFormationSuccess,
    P2pGroupFormationFailure,
    P2pGroupStarted,
    P2pGroupRemoved,
    P2pProvDiscShowPin,
    P2pProvDiscEnterPin,
    P2pProvDiscPbcReq,
    P2pProvDiscPbcResp,
    P2pServDiscReq,
    P2pServDiscResp,
    P2pInvitationReceived,
    P2pInvitationResult,
}

/// Kept in ascending lexicographic order; lookup is a binary search.
static EVENT_TABLE: &[(&str, EventId)] = &[
    ("AP-STA-CONNECTED", EventId::ApStaConnected),
    ("AP-STA-DISCONNECTED", EventId::ApStaDisconnected),
    ("P2P-DEVICE-FOUND", EventId::P2pDeviceFound),
    ("P2P-GO-NEG-FAILURE", EventId::P2pGoNegFailure),
    ("P2P-GO-NEG-REQUEST", EventId::P2pGoNegRequest),
    ("P2P-GO-NEG-SUCCESS", EventId::P2pGoNegSuccess),
    ("P2P-GROUP-FORMATION-FAILURE", EventId::P2pGroupFormationFailure),
    ("P2P-GROUP-FORMATION-SUCCESS", EventId::P2pGroupFormationSuccess),
    ("P2P-GROUP-REMOVED", EventId::P2pGroupRemoved),
    ("P2P-GROUP-STARTED", EventId::P2pGroupStarted),
    ("P2P-INVITATION-RECEIVED", EventId::P2pInvitationReceived),
    ("P2P-INVITATION-RESULT", EventId::P2pInvitationResult),
    ("P2P-PROV-DISC-ENTER-PIN", EventId::P2pProvDiscEnterPin),
    ("P2P-PROV-DISC-PBC-REQ", EventId::P2pProvDiscPbcReq),
    ("P2P-PROV-DISC-PBC-RESP", EventId::P2pProvDiscPbcResp),
    ("P2P-PROV-DISC-SHOW-PIN", EventId::P2pProvDiscShowPin),
    ("P2P-SERV-DISC-REQ", EventId::P2pServDiscReq),
    ("P2P-SERV-DISC-RESP", EventId::P2pServDiscResp),
];

impl EventId {
    /// Canonical wire token of this tag; empty for `Unknown`.
    pub fn name(self) -> &'static str {
        EVENT_TABLE.iter().find(|(_, id)| *id == self).map_or("", |(name, _)| name)
    }
}

/// Typed payload carried by the tags that have one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Payload {
    #[default]
    None,
    ApStaConnected {
        mac: String,
    },
    ApStaDisconnected {
        mac: String,
    },
    P2pDeviceFound {
        peer_mac: String,
        name: Option<String>,
    },
    P2pProvDiscShowPin {
        peer_mac: String,
        pin: String,
    },
    P2pProvDiscEnterPin {
        peer_mac: String,
    },
    P2pProvDiscPbcReq {
        peer_mac: String,
    },
    P2pProvDiscPbcResp {
        peer_mac: String,
    },
}

/// One parsed unsolicited event line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WpaEvent {
    pub id: EventId,
    pub priority: Priority,
    /// Payload text after the tag, verbatim.
    pub raw: String,
    pub payload: Payload,
}

impl Default for EventId {
    fn default() -> Self {
        Self::Unknown
    }
}

impl WpaEvent {
    /// Parse one event line of the form `"<" DIGIT ">"? TAG (SP PAYLOAD)?`.
    ///
    /// An unrecognised tag yields an `Unknown` event rather than an error;
    /// a recognised tag with a malformed payload is an error for this event
    /// only.
    pub fn parse(event: &str) -> Result<Self, WpaError> {
        let (priority, rest) = parse_priority(event);

        let Some(id) = lookup_tag(rest) else {
            return Ok(Self { priority, ..Self::default() });
        };

        let rest = &rest[id.name().len()..];
        let raw = rest.trim_start_matches(' ').to_owned();

        let tokens = tokenize(&raw);
        let payload = parse_payload(id, &tokens)?;
        Ok(Self { id, priority, raw, payload })
    }
}

/// Strip and decode an optional `<digit>` priority prefix.
///
/// The supplicant is not entirely trustworthy here: out-of-range digits,
/// garbage between the brackets and constructs like `<-1>` all fold to
/// `Msgdump`. A `<` without a closing `>` makes the whole line unknowable,
/// so the cursor is left on it.
fn parse_priority(event: &str) -> (Priority, &str) {
    let Some(inner) = event.strip_prefix('<') else {
        return (Priority::Msgdump, event);
    };
    let Some(close) = inner.find('>') else {
        return (Priority::Msgdump, event);
    };

    let digits = &inner[..close];
    let rest = &inner[close + 1..];
    let priority = digits
        .parse::<u32>()
        .ok()
        .and_then(Priority::from_digit)
        .unwrap_or(Priority::Msgdump);
    (priority, rest)
}

fn lookup_tag(cursor: &str) -> Option<EventId> {
    EVENT_TABLE
        .binary_search_by(|(name, _)| cmp_tag(cursor, name).reverse())
        .ok()
        .map(|i| EVENT_TABLE[i].1)
}

/// Compare an event line against a table tag: the tag must be a prefix
/// followed by end-of-line or a space.
fn cmp_tag(key: &str, name: &str) -> Ordering {
    let k = key.as_bytes();
    let n = name.as_bytes();
    for i in 0..n.len() {
        match k.get(i) {
            None => return Ordering::Less,
            Some(kb) => match kb.cmp(&n[i]) {
                Ordering::Equal => {}
                other => return other,
            },
        }
    }
    match k.get(n.len()) {
        None | Some(&b' ') => Ordering::Equal,
        Some(_) => Ordering::Greater,
    }
}

/// Payload tokenizer: bare tokens split on whitespace, single-quoted tokens
/// take backslash-escaped bytes literally.
fn tokenize(src: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    let mut have = false;
    let mut quoted = false;
    let mut escaped = false;

    for c in src.chars() {
        if quoted {
            if escaped {
                cur.push(c);
                escaped = false;
            } else if c == '\'' {
                quoted = false;
            } else if c == '\\' {
                escaped = true;
            } else {
                cur.push(c);
            }
        } else if matches!(c, ' ' | '\n' | '\t' | '\r') {
            if have {
                tokens.push(std::mem::take(&mut cur));
                have = false;
            }
        } else if c == '\'' {
            quoted = true;
            escaped = false;
            // an opening quote counts as token content: '' is an
            // empty token, name='' carries an empty name
            have = true;
        } else {
            cur.push(c);
            have = true;
        }
    }
    if have {
        tokens.push(cur);
    }
    tokens
}

/// A MAC is six `:`-separated groups of one or two hex digits.
fn parse_mac(src: &str) -> Result<String, WpaError> {
    let valid = src.len() <= MAC_STRLEN &&
        src.split(':').count() == 6 &&
        src.split(':').all(|g| {
            (1..=2).contains(&g.len()) && g.bytes().all(|b| b.is_ascii_hexdigit())
        });
    if !valid {
        return Err(WpaError::InvalidEvent("malformed mac address"));
    }
    Ok(src.to_owned())
}

fn mac_at(tokens: &[String], pos: usize) -> Result<String, WpaError> {
    let token = tokens.get(pos).ok_or(WpaError::InvalidEvent("missing mac address"))?;
    parse_mac(token)
}

fn parse_payload(id: EventId, tokens: &[String]) -> Result<Payload, WpaError> {
    // a tag without any payload is valid on its own; required fields are
    // only enforced once a payload is present
    if tokens.is_empty() {
        return Ok(Payload::None);
    }
    Ok(match id {
        EventId::ApStaConnected => Payload::ApStaConnected { mac: mac_at(tokens, 0)? },
        EventId::ApStaDisconnected => Payload::ApStaDisconnected { mac: mac_at(tokens, 0)? },
        EventId::P2pDeviceFound => {
            if tokens.len() < 2 {
                return Err(WpaError::InvalidEvent("device-found payload too short"));
            }
            let peer_mac = mac_at(tokens, 0)?;
            let name = tokens[1..]
                .iter()
                .find_map(|t| t.strip_prefix("name="))
                .map(str::to_owned);
            Payload::P2pDeviceFound { peer_mac, name }
        }
        EventId::P2pProvDiscShowPin => {
            if tokens.len() < 2 {
                return Err(WpaError::InvalidEvent("show-pin payload too short"));
            }
            Payload::P2pProvDiscShowPin { peer_mac: mac_at(tokens, 0)?, pin: tokens[1].clone() }
        }
        EventId::P2pProvDiscEnterPin => {
            Payload::P2pProvDiscEnterPin { peer_mac: mac_at(tokens, 0)? }
        }
        EventId::P2pProvDiscPbcReq => Payload::P2pProvDiscPbcReq { peer_mac: mac_at(tokens, 0)? },
        EventId::P2pProvDiscPbcResp => {
            Payload::P2pProvDiscPbcResp { peer_mac: mac_at(tokens, 0)? }
        }
        _ => Payload::None,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn table_is_sorted_and_unique() {
        for pair in EVENT_TABLE.windows(2) {
            assert!(pair[0].0 < pair[1].0, "{} !< {}", pair[0].0, pair[1].0);
        }
    }

    #[test]
    fn every_tag_parses_to_itself() {
        for &(name, id) in EVENT_TABLE {
            let ev = WpaEvent::parse(name).unwrap();
            assert_eq!(ev.id, id, "tag {name}");
            assert_eq!(ev.priority, Priority::Msgdump);
            assert_eq!(ev.id.name(), name);
        }
    }

    #[test]
    fn unknown_events() {
        for line in ["", "asdf", "AP-STA", "AP-STA-CONNECTED2", "<4>AP-STA-CONNECTED2"] {
            let ev = WpaEvent::parse(line).unwrap();
            assert_eq!(ev.id, EventId::Unknown, "line {line:?}");
            assert!(ev.raw.is_empty());
        }
    }

    #[test]
    fn priority_folding() {
        let ev = WpaEvent::parse("<4>AP-STA-CONNECTED 00:00:00:00:00:00").unwrap();
        assert_eq!(ev.priority, Priority::Error);
        assert_eq!(ev.id, EventId::ApStaConnected);

        // out of range, garbage, or sign-prefixed digits all fold
        for line in [
            "<5>AP-STA-CONNECTED 0:0:0:0:0:0",
            "<4asdf>AP-STA-CONNECTED 0:0:0:0:0:0",
            "<->AP-STA-CONNECTED 0:0:0:0:0:0",
            "<=>AP-STA-CONNECTED 0:0:0:0:0:0",
            "<>AP-STA-CONNECTED 0:0:0:0:0:0",
        ] {
            let ev = WpaEvent::parse(line).unwrap();
            assert_eq!(ev.priority, Priority::Msgdump, "line {line:?}");
            assert_eq!(ev.id, EventId::ApStaConnected);
        }

        // '<' without '>' hides the tag
        let ev = WpaEvent::parse("<4AP-STA-CONNECTED").unwrap();
        assert_eq!(ev.id, EventId::Unknown);
    }

    #[test]
    fn raw_payload_is_verbatim() {
        let ev = WpaEvent::parse("<4>P2P-GO-NEG-REQUEST something  else").unwrap();
        assert_eq!(ev.id, EventId::P2pGoNegRequest);
        assert_eq!(ev.raw, "something  else");
        assert_eq!(ev.payload, Payload::None);

        let ev = WpaEvent::parse("P2P-GO-NEG-REQUEST").unwrap();
        assert!(ev.raw.is_empty());
    }

    #[test]
    fn station_events_take_a_mac() {
        let ev = WpaEvent::parse("<4>AP-STA-CONNECTED 00:00:00:00:00:00").unwrap();
        assert_eq!(ev.payload, Payload::ApStaConnected { mac: "00:00:00:00:00:00".into() });

        // bare tag is fine, a present but bad payload is not
        let ev = WpaEvent::parse("AP-STA-CONNECTED").unwrap();
        assert_eq!(ev.payload, Payload::None);
        assert!(WpaEvent::parse("AP-STA-CONNECTED 00:00:00:00:00").is_err());
        assert!(WpaEvent::parse("AP-STA-CONNECTED zz:00:00:00:00:00").is_err());
        assert!(WpaEvent::parse("AP-STA-CONNECTED 000:00:00:00:00:00:00").is_err());
    }

    #[test]
    fn device_found_with_quoted_name() {
        let ev =
            WpaEvent::parse("<4>P2P-DEVICE-FOUND 0:0:0:0:0:0 name=some-'name\\\\\\''").unwrap();
        assert_eq!(
            ev.payload,
            Payload::P2pDeviceFound {
                peer_mac: "0:0:0:0:0:0".into(),
                name: Some("some-name\\'".into()),
            }
        );
    }

    #[test]
    fn device_found_without_name() {
        let ev = WpaEvent::parse("P2P-DEVICE-FOUND 0:0:0:0:0:0 ignored=x").unwrap();
        assert_eq!(
            ev.payload,
            Payload::P2pDeviceFound { peer_mac: "0:0:0:0:0:0".into(), name: None }
        );
        // a single token is not enough
        assert!(WpaEvent::parse("P2P-DEVICE-FOUND 0:0:0:0:0:0").is_err());
    }

    #[test]
    fn show_pin_takes_mac_and_pin() {
        let ev = WpaEvent::parse("P2P-PROV-DISC-SHOW-PIN 01:02:03:a0:b0:c0 12345670").unwrap();
        assert_eq!(
            ev.payload,
            Payload::P2pProvDiscShowPin {
                peer_mac: "01:02:03:a0:b0:c0".into(),
                pin: "12345670".into(),
            }
        );
        assert!(WpaEvent::parse("P2P-PROV-DISC-SHOW-PIN 01:02:03:a0:b0:c0").is_err());
    }

    #[test]
    fn pbc_events_take_a_mac() {
        for (line, want_mac) in [
            ("P2P-PROV-DISC-ENTER-PIN 1:2:3:4:5:6", "1:2:3:4:5:6"),
            ("P2P-PROV-DISC-PBC-REQ 1:2:3:4:5:6 extra", "1:2:3:4:5:6"),
            ("P2P-PROV-DISC-PBC-RESP aa:bb:cc:dd:ee:ff", "aa:bb:cc:dd:ee:ff"),
        ] {
            let ev = WpaEvent::parse(line).unwrap();
            let mac = match &ev.payload {
                Payload::P2pProvDiscEnterPin { peer_mac } |
                Payload::P2pProvDiscPbcReq { peer_mac } |
                Payload::P2pProvDiscPbcResp { peer_mac } => peer_mac,
                other => panic!("unexpected payload {other:?}"),
            };
            assert_eq!(mac, want_mac);
        }
    }

    #[test]
    fn quoted_tokens() {
        assert_eq!(tokenize("a 'b c' d"), vec!["a", "b c", "d"]);
        assert_eq!(tokenize("x\\y"), vec!["x\\y"]);
        assert_eq!(tokenize("'a\\'b'"), vec!["a'b"]);
        // empty quotes still make a token
        assert_eq!(tokenize("name='' z"), vec!["name=", "z"]);
        assert_eq!(tokenize("  spaced\t\tout  "), vec!["spaced", "out"]);
    }
}
