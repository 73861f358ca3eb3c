#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const TEXT_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "edit",
        action: "set_custom_edit",
    },
    CommandSpec {
        command: "fit",
        action: "set_fit",
    },
];

pub(crate) const INDEX_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "remove_garment",
        action: "remove_garment",
    },
    CommandSpec {
        command: "apply",
        action: "apply_suggestion",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "person",
    action: "set_person",
}];

pub(crate) const MULTI_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "garments",
        action: "add_garments",
    },
    CommandSpec {
        command: "garment",
        action: "add_garments",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "generate",
        action: "generate",
    },
    CommandSpec {
        command: "try_on",
        action: "generate",
    },
    CommandSpec {
        command: "enhance",
        action: "enhance",
    },
    CommandSpec {
        command: "undo",
        action: "undo",
    },
    CommandSpec {
        command: "redo",
        action: "redo",
    },
    CommandSpec {
        command: "suggestions",
        action: "show_suggestions",
    },
    CommandSpec {
        command: "surprise",
        action: "surprise",
    },
    CommandSpec {
        command: "background_presets",
        action: "background_presets",
    },
    CommandSpec {
        command: "reset",
        action: "reset_generation",
    },
    CommandSpec {
        command: "start_over",
        action: "start_over",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub(crate) const POSE_COMMAND: &str = "pose";
pub(crate) const BACKGROUND_COMMAND: &str = "background";

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/person PATH",
    "/garments PATH...",
    "/remove_garment N",
    "/pose original|replicate|custom [TEXT]",
    "/fit slim|regular|loose|baggy|oversized",
    "/background outfit|clear|TEXT",
    "/edit TEXT",
    "/generate",
    "/enhance",
    "/undo",
    "/redo",
    "/suggestions",
    "/apply N",
    "/surprise",
    "/background_presets",
    "/reset",
    "/start_over",
    "/status",
    "/help",
    "/quit",
];
