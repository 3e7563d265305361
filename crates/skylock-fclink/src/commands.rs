//! Operator command parsing from the ground-station link.
//!
//! Two wire families map onto [`UserCommand`]: COMMAND_LONG entries in the
//! user-command id range with positional params, and NAMED_VALUE_INT
//! toggles for GCS widgets that can only emit named scalars. Anything else
//! is silently ignored.

use mavlink::common::{MavCmd, MavMessage, MavResult, COMMAND_ACK_DATA, COMMAND_LONG_DATA};

use skylock_proto::types::UserCommand;

/// User-range command slots.
pub const CMD_SELECT_TARGET_ID: MavCmd = MavCmd::MAV_CMD_USER_1;
pub const CMD_SELECT_TARGET_PIXEL: MavCmd = MavCmd::MAV_CMD_USER_2;
pub const CMD_SET_DEPTH_RANGE: MavCmd = MavCmd::MAV_CMD_USER_3;
pub const CMD_CLEAR_LOCK: MavCmd = MavCmd::MAV_CMD_USER_4;
pub const CMD_REQUEST_TRACK_LIST: MavCmd = MavCmd::MAV_CMD_USER_5;

/// Parse one incoming message into a command, if it is one.
pub fn parse_message(msg: &MavMessage) -> Option<UserCommand> {
    match msg {
        MavMessage::COMMAND_LONG(cmd) => parse_command_long(cmd),
        MavMessage::NAMED_VALUE_INT(nv) => {
            parse_named_value(decode_name(&nv.name).as_str(), nv.value)
        }
        _ => None,
    }
}

fn parse_command_long(cmd: &COMMAND_LONG_DATA) -> Option<UserCommand> {
    match cmd.command {
        c if c == CMD_SELECT_TARGET_ID => Some(UserCommand::SelectTargetById {
            track_id: cmd.param1 as u64,
        }),
        c if c == CMD_SELECT_TARGET_PIXEL => Some(UserCommand::SelectTargetByPixel {
            u: cmd.param1 as i32,
            v: cmd.param2 as i32,
        }),
        c if c == CMD_SET_DEPTH_RANGE => Some(UserCommand::SetDepthRange {
            min_m: cmd.param1 as f64,
            max_m: cmd.param2 as f64,
        }),
        c if c == CMD_CLEAR_LOCK => Some(UserCommand::ClearLock),
        c if c == CMD_REQUEST_TRACK_LIST => Some(UserCommand::RequestTrackList),
        _ => None,
    }
}

fn parse_named_value(name: &str, value: i32) -> Option<UserCommand> {
    match (name, value) {
        ("TRK_START", 1) => Some(UserCommand::StartTracking),
        ("TRK_STOP", 1) => Some(UserCommand::StopTracking),
        ("TRK_SEL_ID", id) if id >= 0 => Some(UserCommand::SelectTargetById {
            track_id: id as u64,
        }),
        ("TRK_CLEAR", 1) => Some(UserCommand::ClearLock),
        _ => None,
    }
}

/// COMMAND_ACK response for a handled command.
pub fn command_ack(command: MavCmd, result: MavResult) -> MavMessage {
    MavMessage::COMMAND_ACK(COMMAND_ACK_DATA {
        command,
        result,
        ..Default::default()
    })
}

/// Strip the null padding off a named-value name field.
pub fn decode_name(name: &[u8; 10]) -> String {
    let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    String::from_utf8_lossy(&name[..end]).into_owned()
}

/// ASCII, at most 10 bytes, null-padded.
pub fn encode_name(name: &str) -> [u8; 10] {
    let mut out = [0u8; 10];
    for (i, b) in name.bytes().take(10).enumerate() {
        out[i] = b;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::common::NAMED_VALUE_INT_DATA;

    fn command_long(command: MavCmd, param1: f32, param2: f32) -> MavMessage {
        MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            target_system: 1,
            target_component: 1,
            command,
            confirmation: 0,
            param1,
            param2,
            param3: 0.0,
            param4: 0.0,
            param5: 0.0,
            param6: 0.0,
            param7: 0.0,
        })
    }

    fn named_int(name: &str, value: i32) -> MavMessage {
        MavMessage::NAMED_VALUE_INT(NAMED_VALUE_INT_DATA {
            time_boot_ms: 0,
            value,
            name: encode_name(name),
        })
    }

    #[test]
    fn select_by_id_takes_param1() {
        let cmd = parse_message(&command_long(CMD_SELECT_TARGET_ID, 42.0, 0.0));
        assert_eq!(cmd, Some(UserCommand::SelectTargetById { track_id: 42 }));
    }

    #[test]
    fn select_by_pixel_takes_uv() {
        let cmd = parse_message(&command_long(CMD_SELECT_TARGET_PIXEL, 640.0, 480.0));
        assert_eq!(cmd, Some(UserCommand::SelectTargetByPixel { u: 640, v: 480 }));
    }

    #[test]
    fn depth_range_takes_min_max() {
        let cmd = parse_message(&command_long(CMD_SET_DEPTH_RANGE, 5.0, 30.0));
        assert_eq!(
            cmd,
            Some(UserCommand::SetDepthRange {
                min_m: 5.0,
                max_m: 30.0
            })
        );
    }

    #[test]
    fn clear_and_list_request_have_no_params() {
        assert_eq!(
            parse_message(&command_long(CMD_CLEAR_LOCK, 0.0, 0.0)),
            Some(UserCommand::ClearLock)
        );
        assert_eq!(
            parse_message(&command_long(CMD_REQUEST_TRACK_LIST, 0.0, 0.0)),
            Some(UserCommand::RequestTrackList)
        );
    }

    #[test]
    fn unrelated_command_long_is_ignored() {
        let msg = command_long(MavCmd::MAV_CMD_NAV_RETURN_TO_LAUNCH, 0.0, 0.0);
        assert_eq!(parse_message(&msg), None);
    }

    #[test]
    fn named_value_toggles() {
        assert_eq!(
            parse_message(&named_int("TRK_START", 1)),
            Some(UserCommand::StartTracking)
        );
        assert_eq!(
            parse_message(&named_int("TRK_STOP", 1)),
            Some(UserCommand::StopTracking)
        );
        assert_eq!(
            parse_message(&named_int("TRK_CLEAR", 1)),
            Some(UserCommand::ClearLock)
        );
        assert_eq!(
            parse_message(&named_int("TRK_SEL_ID", 7)),
            Some(UserCommand::SelectTargetById { track_id: 7 })
        );
    }

    #[test]
    fn named_value_zero_is_not_a_trigger() {
        assert_eq!(parse_message(&named_int("TRK_START", 0)), None);
        assert_eq!(parse_message(&named_int("TRK_SEL_ID", -1)), None);
    }

    #[test]
    fn unknown_names_and_types_are_ignored() {
        assert_eq!(parse_message(&named_int("BAT1_ACTIVE", 1)), None);
        let hb = MavMessage::HEARTBEAT(Default::default());
        assert_eq!(parse_message(&hb), None);
    }

    #[test]
    fn name_codec_pads_and_truncates() {
        let enc = encode_name("TRK_START");
        assert_eq!(&enc[..9], b"TRK_START");
        assert_eq!(enc[9], 0);
        assert_eq!(decode_name(&enc), "TRK_START");

        let long = encode_name("WAY_TOO_LONG_NAME");
        assert_eq!(long.len(), 10);
        assert_eq!(decode_name(&long), "WAY_TOO_LO");
    }

    #[test]
    fn ack_echoes_command() {
        let msg = command_ack(CMD_CLEAR_LOCK, MavResult::MAV_RESULT_ACCEPTED);
        match msg {
            MavMessage::COMMAND_ACK(ack) => {
                assert_eq!(ack.command, CMD_CLEAR_LOCK);
                assert_eq!(ack.result, MavResult::MAV_RESULT_ACCEPTED);
            }
            other => panic!("wrong message type: {:?}", other),
        }
    }
}
