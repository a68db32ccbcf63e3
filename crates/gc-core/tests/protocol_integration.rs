//! Integration tests for the gc-core public API.
//!
//! These exercise the pieces together the way the broker uses them: a MAP
//! code is detected and converted, then rendered into a `sendir` line with a
//! transaction id, and the reply is parsed back.

use gc_core::protocol::{
    decode_latin1, encode_latin1, CommandReply, Delimiter, DeviceCommand, FrameScanner,
};
use gc_core::{
    convert_hex_to_native, is_hex_code, DeviceCapabilities, DeviceType, IrTransactionCounter,
    TargetPort,
};

#[test]
fn test_hex_code_becomes_sendir_line() {
    // Arrange
    let code = "0000 006D 0022 0002 0156 00AC 0015 0015";
    let counter = IrTransactionCounter::new();

    // Act
    assert!(is_hex_code(code));
    let native = convert_hex_to_native(code).unwrap();
    let cmd = DeviceCommand::SendIr {
        module: 1,
        connector: 2,
        id: counter.next(),
        code: native,
    };

    // Assert
    assert_eq!(cmd.to_line(), "sendir,1:2,1,38028,1,69,342,172,21,21");
    assert_eq!(
        cmd.parse_reply("completeir,1:2,1").unwrap(),
        CommandReply::CompleteIr { module: 1, connector: 2, id: 1 }
    );
}

#[test]
fn test_native_code_is_passed_through() {
    let code = "38000,1,1,342,172,21,21";
    assert!(!is_hex_code(code));
}

#[test]
fn test_configured_delimiter_frames_feedback_for_host() {
    // Arrange – delimiter as it appears in the configuration file
    let delimiter = Delimiter::from_url_encoded("%0D").unwrap();
    let mut scanner = FrameScanner::new(delimiter);

    // Act
    let frames = scanner.push_slice(b"PWR ON\rVOL 5");

    // Assert – the host sees the URL-encoded message, delimiter included
    assert_eq!(frames.len(), 1);
    assert_eq!(encode_latin1(&frames[0]), "PWR+ON%0D");
    assert_eq!(scanner.pending(), b"VOL 5");
}

#[test]
fn test_serial_payload_decodes_to_raw_bytes() {
    assert_eq!(decode_latin1("PWR%3DON%0D").unwrap(), b"PWR=ON\r".to_vec());
}

#[test]
fn test_gc100_12_serial_ports_map_to_modules() {
    let caps = DeviceCapabilities::for_device(DeviceType::Gc100_12, Default::default());
    for module in [1u8, 2] {
        let port = TargetPort::serial_for_module(module).unwrap();
        assert!(caps.supports(port));
    }
}
