//! Unit tests for the newline framing codec.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use agent_conduit::agent::codec::{AgentCodec, Frame, MAX_LINE_BYTES};

fn line(text: &str) -> Option<Frame> {
    Some(Frame::Line(text.to_owned()))
}

#[test]
fn complete_line_is_yielded_without_terminator() {
    let mut codec = AgentCodec::new();
    let mut buf = BytesMut::from("{\"type\":\"text\",\"content\":\"hi\"}\n");

    let frame = codec.decode(&mut buf).expect("decode never fails");
    assert_eq!(frame, line("{\"type\":\"text\",\"content\":\"hi\"}"));
    assert!(buf.is_empty());
}

#[test]
fn batched_lines_come_out_in_order() {
    let mut codec = AgentCodec::new();
    let mut buf = BytesMut::from("one\ntwo\nthree\n");

    assert_eq!(codec.decode(&mut buf).expect("decode"), line("one"));
    assert_eq!(codec.decode(&mut buf).expect("decode"), line("two"));
    assert_eq!(codec.decode(&mut buf).expect("decode"), line("three"));
    assert_eq!(codec.decode(&mut buf).expect("decode"), None);
}

#[test]
fn partial_line_waits_for_newline() {
    let mut codec = AgentCodec::new();
    let mut buf = BytesMut::from("{\"type\":");

    assert_eq!(codec.decode(&mut buf).expect("decode"), None);

    buf.extend_from_slice(b"\"text\"}\n");
    assert_eq!(
        codec.decode(&mut buf).expect("decode"),
        line("{\"type\":\"text\"}")
    );
}

#[test]
fn crlf_terminator_is_stripped() {
    let mut codec = AgentCodec::new();
    let mut buf = BytesMut::from("windows\r\n");
    assert_eq!(codec.decode(&mut buf).expect("decode"), line("windows"));
}

#[test]
fn invalid_utf8_is_decoded_lossily() {
    let mut codec = AgentCodec::new();
    let mut buf = BytesMut::from(&b"ok \xff bytes\n"[..]);

    let Some(Frame::Line(text)) = codec.decode(&mut buf).expect("decode") else {
        panic!("expected a line frame");
    };
    assert!(text.starts_with("ok "));
    assert!(text.contains('\u{FFFD}'));
}

#[test]
fn over_long_line_is_dropped_and_next_line_survives() {
    let mut codec = AgentCodec::with_max_length(8);
    let mut buf = BytesMut::from("0123456789abcdef\nshort\n");

    assert_eq!(
        codec.decode(&mut buf).expect("decode"),
        Some(Frame::Oversized { discarded: 16 })
    );
    assert_eq!(codec.decode(&mut buf).expect("decode"), line("short"));
}

#[test]
fn over_long_partial_line_is_discarded_across_reads() {
    let mut codec = AgentCodec::with_max_length(4);
    let mut buf = BytesMut::from("abcdefgh");

    assert_eq!(codec.decode(&mut buf).expect("decode"), None);
    assert!(buf.is_empty(), "discarded bytes must not accumulate");

    buf.extend_from_slice(b"ij\nnext\n");
    assert_eq!(
        codec.decode(&mut buf).expect("decode"),
        Some(Frame::Oversized { discarded: 10 })
    );
    assert_eq!(codec.decode(&mut buf).expect("decode"), line("next"));
}

#[test]
fn eof_flushes_final_unterminated_line() {
    let mut codec = AgentCodec::new();
    let mut buf = BytesMut::from("last words");

    assert_eq!(codec.decode(&mut buf).expect("decode"), None);
    assert_eq!(codec.decode_eof(&mut buf).expect("decode_eof"), line("last words"));
    assert_eq!(codec.decode_eof(&mut buf).expect("decode_eof"), None);
}

#[test]
fn default_limit_is_one_mebibyte() {
    assert_eq!(MAX_LINE_BYTES, 1024 * 1024);
}
