pub const TOPIC_CLIMATE_STATE: &str = "acp24/climate/state";
pub const TOPIC_CLIMATE_SCHEDULE_STATE: &str = "acp24/climate/schedule/state";

pub const TOPIC_IR_RECEIVED: &str = "acp24/ir/received";

pub const TOPIC_CMD_MODE: &str = "acp24/cmnd/mode";
pub const TOPIC_CMD_TARGET: &str = "acp24/cmnd/target";
pub const TOPIC_CMD_FAN: &str = "acp24/cmnd/fan";
pub const TOPIC_CMD_PRESET: &str = "acp24/cmnd/preset";
pub const TOPIC_CMD_SCHEDULE: &str = "acp24/cmnd/schedule";
