use crate::core::{PlayerError, Result};
use log::{debug, info};
use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

/// 内容长度：某些流（直播、管道）无法预知长度，这不是错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentLength {
    Known(u64),
    Unknown,
}

impl ContentLength {
    pub fn known(self) -> Option<u64> {
        match self {
            ContentLength::Known(len) => Some(len),
            ContentLength::Unknown => None,
        }
    }
}

/// 字节流抽象（外部 IO）
///
/// 读 / 写 / seek 失败统一映射为 `PlayerError::Io`。
pub trait ByteStream: Send {
    fn open(&mut self) -> Result<()>;

    fn close(&mut self);

    /// 读取最多 `buf.len()` 字节，返回 0 表示末尾
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// 按 `SeekFrom`（起点 / 当前 / 末尾）定位，返回新的绝对偏移
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    fn content_length(&self) -> ContentLength {
        ContentLength::Unknown
    }

    /// 获取描述信息（用于日志）
    fn description(&self) -> String;

    /// 给用户看的短名字，例如不带扩展名的文件名
    fn name(&self) -> Option<String> {
        None
    }

    /// 尽量读满 `buf`，只有到达末尾才会少读
    fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

fn not_open(what: &str) -> PlayerError {
    PlayerError::Io(format!("{} 尚未打开", what))
}

/// 本地文件字节流
pub struct FileByteStream {
    path: PathBuf,
    writable: bool,
    file: Option<File>,
    length: Option<u64>,
}

impl FileByteStream {
    /// 只读打开
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writable: false,
            file: None,
            length: None,
        }
    }

    /// 可读写（不存在则创建）
    pub fn writable(path: impl Into<PathBuf>) -> Self {
        Self {
            writable: true,
            ..Self::new(path)
        }
    }

    fn file(&mut self) -> Result<&mut File> {
        let description = self.path.display().to_string();
        self.file.as_mut().ok_or_else(|| not_open(&description))
    }
}

impl ByteStream for FileByteStream {
    fn open(&mut self) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(self.writable)
            .create(self.writable)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| PlayerError::OpenFailure(format!("{}: {}", self.path.display(), e)))?;

        self.length = file.metadata().ok().map(|m| m.len());
        info!("📂 打开文件: {} ({:?} 字节)", self.path.display(), self.length);
        self.file = Some(file);
        Ok(())
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("📂 关闭文件: {}", self.path.display());
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file()?.read(buf)?)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let written = self.file()?.write(buf)?;
        if let Some(file) = self.file.as_ref() {
            self.length = file.metadata().ok().map(|m| m.len());
        }
        Ok(written)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.file()?.seek(pos)?)
    }

    fn content_length(&self) -> ContentLength {
        self.length.map_or(ContentLength::Unknown, ContentLength::Known)
    }

    fn description(&self) -> String {
        format!("file://{}", self.path.display())
    }

    fn name(&self) -> Option<String> {
        self.path.file_stem().map(|stem| stem.to_string_lossy().into_owned())
    }
}

/// 内存字节流（测试 / 内嵌资源）
pub struct MemoryByteStream {
    cursor: Cursor<Vec<u8>>,
    is_open: bool,
    length_known: bool,
}

impl MemoryByteStream {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(data),
            is_open: false,
            length_known: true,
        }
    }

    /// 不报告长度（模拟直播 / 管道输入）
    pub fn without_length(mut self) -> Self {
        self.length_known = false;
        self
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.cursor.into_inner()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open {
            Ok(())
        } else {
            Err(not_open("内存流"))
        }
    }
}

impl ByteStream for MemoryByteStream {
    fn open(&mut self) -> Result<()> {
        self.cursor.set_position(0);
        self.is_open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.is_open = false;
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.cursor.read(buf)?)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.cursor.write(buf)?)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.cursor.seek(pos)?)
    }

    fn content_length(&self) -> ContentLength {
        if self.length_known {
            ContentLength::Known(self.cursor.get_ref().len() as u64)
        } else {
            ContentLength::Unknown
        }
    }

    fn description(&self) -> String {
        format!("memory ({} 字节)", self.cursor.get_ref().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_stream_read_seek() {
        let mut stream = MemoryByteStream::new((0u8..10).collect());
        assert!(matches!(stream.read(&mut [0; 4]), Err(PlayerError::Io(_))));

        stream.open().unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(stream.read_full(&mut buf).unwrap(), 4);
        assert_eq!(buf, [0, 1, 2, 3]);

        assert_eq!(stream.seek(SeekFrom::End(-2)).unwrap(), 8);
        assert_eq!(stream.read_full(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[8, 9]);
        assert_eq!(stream.content_length(), ContentLength::Known(10));
    }

    #[test]
    fn test_file_name_drops_extension() {
        let stream = FileByteStream::new("/media/Director Commentary.pcm");
        assert_eq!(stream.name().as_deref(), Some("Director Commentary"));
        assert_eq!(MemoryByteStream::new(vec![]).name(), None);
    }

    #[test]
    fn test_unknown_length_is_not_an_error() {
        let stream = MemoryByteStream::new(vec![1, 2, 3]).without_length();
        assert_eq!(stream.content_length(), ContentLength::Unknown);
        assert_eq!(stream.content_length().known(), None);
    }

    #[test]
    fn test_seek_before_start_is_io_error() {
        let mut stream = MemoryByteStream::new(vec![1, 2, 3]);
        stream.open().unwrap();
        assert!(matches!(stream.seek(SeekFrom::Current(-5)), Err(PlayerError::Io(_))));
    }

    #[test]
    fn test_file_stream_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pcm.raw");

        let mut writer = FileByteStream::writable(&path);
        writer.open().unwrap();
        assert_eq!(writer.write(&[7, 8, 9]).unwrap(), 3);
        assert_eq!(writer.content_length(), ContentLength::Known(3));
        writer.close();

        let mut reader = FileByteStream::new(&path);
        reader.open().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(reader.read_full(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[7, 8, 9]);
        assert!(reader.description().starts_with("file://"));
    }

    #[test]
    fn test_missing_file_is_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut stream = FileByteStream::new(dir.path().join("missing.raw"));
        assert!(matches!(stream.open(), Err(PlayerError::OpenFailure(_))));
        assert!(matches!(stream.read(&mut [0; 1]), Err(PlayerError::Io(_))));
    }
}
