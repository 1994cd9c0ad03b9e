/// Tabla explícita de comandos: una entrada por comando, con su uso para
/// el mensaje de ayuda. El despacho matchea sobre [`CommandKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Help,
    Play,
    Pause,
    Resume,
    Skip,
    NowPlaying,
    Queue,
    Save,
}

#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub usage: &'static str,
    pub kind: CommandKind,
}

pub const COMMAND_TABLE: &[CommandSpec] = &[
    CommandSpec {
        name: "help",
        usage: "help - muestra esta lista",
        kind: CommandKind::Help,
    },
    CommandSpec {
        name: "play",
        usage: "play <url o búsqueda> - encola una pista",
        kind: CommandKind::Play,
    },
    CommandSpec {
        name: "pause",
        usage: "pause - pausa la reproducción",
        kind: CommandKind::Pause,
    },
    CommandSpec {
        name: "resume",
        usage: "resume - reanuda la reproducción",
        kind: CommandKind::Resume,
    },
    CommandSpec {
        name: "skip",
        usage: "skip - vota para saltar la pista actual",
        kind: CommandKind::Skip,
    },
    CommandSpec {
        name: "np",
        usage: "np - qué está sonando y cuánto va",
        kind: CommandKind::NowPlaying,
    },
    CommandSpec {
        name: "queue",
        usage: "queue - lista los pedidos y el playlist",
        kind: CommandKind::Queue,
    },
    CommandSpec {
        name: "save",
        usage: "save - guarda el playlist a disco",
        kind: CommandKind::Save,
    },
];

pub fn find_command(name: &str) -> Option<&'static CommandSpec> {
    COMMAND_TABLE.iter().find(|spec| spec.name == name)
}

/// Separa `"play algo largo"` en nombre y resto. El nombre es
/// case-insensitive; los argumentos se entregan tal cual, recortados.
pub fn split_invocation(rest: &str) -> (String, &str) {
    match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name.to_ascii_lowercase(), args.trim()),
        None => (rest.trim().to_ascii_lowercase(), ""),
    }
}

/// Texto del comando de ayuda, armado desde la tabla.
pub fn help_text(prefix: &str) -> String {
    let mut lines = String::new();
    for spec in COMMAND_TABLE {
        lines.push_str(&format!("{prefix}{}\n", spec.usage));
    }
    format!("**Commands**\n```{lines}```")
}
