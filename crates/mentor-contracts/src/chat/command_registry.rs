#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "text_model",
        action: "set_text_model",
    },
    CommandSpec {
        command: "image_model",
        action: "set_image_model",
    },
];

/// Page switches. The command names double as page slugs.
pub(crate) const PAGE_COMMANDS: &[&str] = &[
    "teaching", "teach", "image", "img", "math", "solve", "history",
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "pages",
        action: "list_pages",
    },
    CommandSpec {
        command: "download",
        action: "download",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
];

pub(crate) const EXPORT_COMMAND: CommandSpec = CommandSpec {
    command: "export",
    action: "export",
};

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/teaching",
    "/image",
    "/math",
    "/history",
    "/pages",
    "/download",
    "/export",
    "/text_model",
    "/image_model",
    "/help",
];
