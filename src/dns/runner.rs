use std::fmt;
use std::io;
use tokio::process::Command;
use tracing::debug;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// How a program encodes what it writes to a pipe.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ConsoleEncoding {
    #[default]
    Utf8,
    /// The console OEM code page; console tools such as `netsh` use it.
    Oem,
}

/// A concrete external program invocation.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub encoding: ConsoleEncoding,
}

impl Invocation {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            encoding: ConsoleEncoding::Utf8,
        }
    }

    pub fn with_encoding(mut self, encoding: ConsoleEncoding) -> Self {
        self.encoding = encoding;
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// What a finished process left behind.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ProcessOutput {
    /// `None` when the process was terminated without an exit code.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stdout followed by stderr, trimmed.
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, _) => stderr.to_string(),
            (false, true) => stdout.to_string(),
            (false, false) => format!("{}\n{}", stdout, stderr),
        }
    }
}

/// Runs external programs. The error case means the program could not be
/// started at all; a started program that fails still yields an output.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    async fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput>;
}

/// Runs invocations as real child processes.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
        debug!(command = %invocation, "running external command");

        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);

        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);

        let output = command.output().await?;

        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: decode_output(&output.stdout, invocation.encoding),
            stderr: decode_output(&output.stderr, invocation.encoding),
        })
    }
}

pub fn decode_output(bytes: &[u8], encoding: ConsoleEncoding) -> String {
    match encoding {
        ConsoleEncoding::Utf8 => String::from_utf8_lossy(bytes).to_string(),
        ConsoleEncoding::Oem => decode_oem(bytes),
    }
}

#[cfg(target_os = "windows")]
fn decode_oem(bytes: &[u8]) -> String {
    use windows::Win32::Globalization::{GetOEMCP, MULTI_BYTE_TO_WIDE_CHAR_FLAGS, MultiByteToWideChar};

    if bytes.is_empty() {
        return String::new();
    }

    unsafe {
        let codepage = GetOEMCP();
        let flags = MULTI_BYTE_TO_WIDE_CHAR_FLAGS(0);

        let len = MultiByteToWideChar(codepage, flags, bytes, None);
        if len <= 0 {
            return String::from_utf8_lossy(bytes).to_string();
        }

        let mut wide = vec![0u16; len as usize];
        let written = MultiByteToWideChar(codepage, flags, bytes, Some(&mut wide));
        if written <= 0 {
            return String::from_utf8_lossy(bytes).to_string();
        }
        String::from_utf16_lossy(&wide[..written as usize])
    }
}

#[cfg(not(target_os = "windows"))]
fn decode_oem(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).to_string()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_display_quotes_spaces() {
        let invocation = Invocation::new("netsh", ["interface", "name=Ethernet 2"]);
        assert_eq!(invocation.to_string(), "netsh interface \"name=Ethernet 2\"");
    }

    #[test]
    fn test_combined_output() {
        let output = ProcessOutput {
            code: Some(1),
            stdout: " out \n".to_string(),
            stderr: "err\n".to_string(),
        };
        assert_eq!(output.combined(), "out\nerr");
        assert!(!output.success());

        let output = ProcessOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: " err ".to_string(),
        };
        assert_eq!(output.combined(), "err");
        assert!(output.success());
    }

    #[test]
    fn test_invocation_defaults_to_utf8() {
        let invocation = Invocation::new("powershell.exe", ["-Command", "Get-NetAdapter"]);
        assert_eq!(invocation.encoding, ConsoleEncoding::Utf8);
        let invocation = invocation.with_encoding(ConsoleEncoding::Oem);
        assert_eq!(invocation.encoding, ConsoleEncoding::Oem);
    }

    #[test]
    fn test_decode_output() {
        let bytes = "Ethernet\r\nСеть".as_bytes();
        assert_eq!(decode_output(bytes, ConsoleEncoding::Utf8), "Ethernet\r\nСеть");
        assert_eq!(decode_output(b"Ok.\r\n", ConsoleEncoding::Oem), "Ok.\r\n");
        assert_eq!(decode_output(b"", ConsoleEncoding::Oem), "");
    }

    #[cfg(target_os = "windows")]
    #[test]
    fn test_decode_oem_uses_console_code_page() {
        use windows::Win32::Globalization::GetOEMCP;

        // 0x84 on its own is never valid UTF-8.
        let decoded = decode_output(b"Ethernet \x84", ConsoleEncoding::Oem);
        assert!(decoded.starts_with("Ethernet "));
        if unsafe { GetOEMCP() } != 65001 {
            assert!(!decoded.contains('\u{FFFD}'));
        }
    }

    #[tokio::test]
    async fn test_system_runner_missing_program() {
        let result = SystemRunner
            .run(&Invocation::new("definitely-not-a-real-program", Vec::<String>::new()))
            .await;
        assert!(result.is_err());
    }
}
