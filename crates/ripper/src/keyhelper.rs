//! Key-helper socket protocol.
//!
//! The helper holds the protected key material and performs AES operations
//! on our behalf over a framed TCP protocol. The protocol is positional and
//! stateful, and strictly sequential: string frames carry a 1-byte length
//! prefix, decrypt frames a little-endian u32 cleartext length followed by
//! the ciphertext, answered by the same number of plaintext bytes. A
//! four-zero-byte frame switches keys between fragments; five zero bytes
//! end the session. One session serves exactly one track.

use std::io::{self, BufReader, BufWriter, Read, Write};
use std::net::TcpStream;

use tracing::{debug, trace};

/// Key URI of the prefetched sample content; sent with content-id `"0"`.
pub const PREFETCH_KEY_URI: &str = "skd://itunes.apple.com/P000000000/s1/e1";

const AES_BLOCK: usize = 16;

pub struct KeyHelperSession {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl KeyHelperSession {
    pub fn connect(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        let reader = BufReader::new(stream.try_clone()?);
        debug!(addr, "connected to key helper");
        Ok(Self {
            reader,
            writer: BufWriter::new(stream),
        })
    }

    #[cfg(test)]
    fn from_stream(stream: TcpStream) -> io::Result<Self> {
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            reader,
            writer: BufWriter::new(stream),
        })
    }

    fn send_string(&mut self, value: &str) -> io::Result<()> {
        let len = u8::try_from(value.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("string frame of {} bytes exceeds the 1-byte length", value.len()),
            )
        })?;
        self.writer.write_all(&[len])?;
        self.writer.write_all(value.as_bytes())
    }

    fn switch_keys(&mut self) -> io::Result<()> {
        self.writer.write_all(&[0, 0, 0, 0])
    }

    /// Announce the key for fragment `index`: a switch-keys frame after the
    /// first fragment, then the content id (the adam id, or `"0"` for the
    /// prefetch key) and the key URI.
    pub fn begin_key(&mut self, index: usize, adam_id: &str, key_uri: &str) -> io::Result<()> {
        if index > 0 {
            self.switch_keys()?;
        }
        let content_id = if key_uri == PREFETCH_KEY_URI { "0" } else { adam_id };
        self.send_string(content_id)?;
        self.send_string(key_uri)?;
        self.writer.flush()
    }

    /// Decrypt the largest 16-byte-aligned prefix of `data` in place.
    pub fn decrypt_full_block(&mut self, data: &mut [u8]) -> io::Result<()> {
        let truncated = data.len() & !(AES_BLOCK - 1);
        if truncated == 0 {
            return Ok(());
        }
        self.writer.write_all(&(truncated as u32).to_le_bytes())?;
        self.writer.write_all(&data[..truncated])?;
        self.writer.flush()?;
        self.reader.read_exact(&mut data[..truncated])?;
        trace!(bytes = truncated, "full-block decrypt");
        Ok(())
    }

    /// Decrypt a `crypt_len`-on / `skip_len`-off stripe pattern in place.
    ///
    /// Only the crypt blocks travel over the wire; skip runs stay put.
    pub fn decrypt_stripe(
        &mut self,
        data: &mut [u8],
        crypt_len: usize,
        skip_len: usize,
    ) -> io::Result<()> {
        let size = data.len();
        if size < crypt_len {
            return Ok(());
        }
        let count = (size - crypt_len) / (crypt_len + skip_len) + 1;
        let total = (count * crypt_len) as u32;
        self.writer.write_all(&total.to_le_bytes())?;

        let mut pos = 0;
        loop {
            if size - pos < crypt_len {
                break;
            }
            self.writer.write_all(&data[pos..pos + crypt_len])?;
            pos += crypt_len;
            if size - pos < skip_len {
                break;
            }
            pos += skip_len;
        }
        self.writer.flush()?;

        let mut pos = 0;
        loop {
            if size - pos < crypt_len {
                break;
            }
            self.reader.read_exact(&mut data[pos..pos + crypt_len])?;
            pos += crypt_len;
            if size - pos < skip_len {
                break;
            }
            pos += skip_len;
        }
        trace!(bytes = total, blocks = count, "stripe decrypt");
        Ok(())
    }

    /// Terminate the session with the five-zero-byte frame.
    pub fn close(mut self) -> io::Result<()> {
        self.writer.write_all(&[0, 0, 0, 0, 0])?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    fn read_string_frame(reader: &mut impl Read) -> io::Result<Vec<u8>> {
        let mut len = [0u8; 1];
        reader.read_exact(&mut len)?;
        let mut content = vec![0u8; len[0] as usize];
        reader.read_exact(&mut content)?;
        Ok(content)
    }

    /// Helper double following the protocol's phase structure: per key
    /// announcement it reads content-id and key-uri string frames (a
    /// leading four-zero frame means switch-keys), then answers decrypt
    /// frames by XOR-ing the ciphertext with 0xFF until a zero length
    /// arrives — four zeros restart the announcement phase, a fifth zero
    /// byte ends the session. Every frame seen is recorded.
    fn spawn_mock_helper(listener: TcpListener) -> thread::JoinHandle<Vec<Vec<u8>>> {
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = BufWriter::new(stream);
            let mut frames: Vec<Vec<u8>> = Vec::new();

            'session: loop {
                // Announcement phase: content-id, then key-uri.
                let Ok(content_id) = read_string_frame(&mut reader) else {
                    break 'session;
                };
                if content_id.is_empty() {
                    // Leading zero: the three remaining switch-keys bytes.
                    let mut rest = [0u8; 3];
                    reader.read_exact(&mut rest).unwrap();
                    frames.push(vec![0; 4]);
                    frames.push(read_string_frame(&mut reader).unwrap());
                } else {
                    frames.push(content_id);
                }
                frames.push(read_string_frame(&mut reader).unwrap());

                // Decrypt phase.
                loop {
                    let mut len_bytes = [0u8; 4];
                    if reader.read_exact(&mut len_bytes).is_err() {
                        break 'session;
                    }
                    let len = u32::from_le_bytes(len_bytes) as usize;
                    if len == 0 {
                        let mut probe = [0u8; 1];
                        if reader.read_exact(&mut probe).is_err() || probe[0] == 0 {
                            frames.push(vec![0; 5]);
                            break 'session;
                        }
                        // Switch-keys followed by the next content-id frame.
                        frames.push(vec![0; 4]);
                        let mut content = vec![0u8; probe[0] as usize];
                        reader.read_exact(&mut content).unwrap();
                        frames.push(content);
                        frames.push(read_string_frame(&mut reader).unwrap());
                        continue;
                    }
                    let mut ciphertext = vec![0u8; len];
                    reader.read_exact(&mut ciphertext).unwrap();
                    frames.push(ciphertext.clone());
                    for b in &mut ciphertext {
                        *b ^= 0xFF;
                    }
                    writer.write_all(&ciphertext).unwrap();
                    writer.flush().unwrap();
                }
            }
            frames
        })
    }

    fn connect_pair() -> (KeyHelperSession, thread::JoinHandle<Vec<Vec<u8>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = spawn_mock_helper(listener);
        let stream = TcpStream::connect(addr).unwrap();
        (KeyHelperSession::from_stream(stream).unwrap(), handle)
    }

    #[test]
    fn test_full_block_roundtrip_truncates_to_alignment() {
        let (mut session, handle) = connect_pair();
        session
            .begin_key(0, "1613600188", "skd://itunes.apple.com/key/1")
            .unwrap();

        let mut data: Vec<u8> = (0..40u8).collect();
        session.decrypt_full_block(&mut data).unwrap();

        // 40 & !15 == 32: the aligned prefix comes back transformed, the
        // 8-byte tail is untouched.
        let expected_head: Vec<u8> = (0..32u8).map(|b| b ^ 0xFF).collect();
        assert_eq!(&data[..32], &expected_head[..]);
        assert_eq!(&data[32..], &(32..40u8).collect::<Vec<u8>>()[..]);

        session.close().unwrap();
        let frames = handle.join().unwrap();
        assert_eq!(frames[0], b"1613600188");
        assert_eq!(frames[1], b"skd://itunes.apple.com/key/1");
        assert_eq!(frames[2], (0..32u8).collect::<Vec<u8>>());
    }

    #[test]
    fn test_stripe_pattern_sends_only_crypt_blocks() {
        let (mut session, handle) = connect_pair();
        session
            .begin_key(0, "123", "skd://itunes.apple.com/key/2")
            .unwrap();

        // 1:9 pattern over 320 protected bytes: two 16-byte crypt blocks.
        let mut data = vec![0xAB_u8; 320];
        session.decrypt_stripe(&mut data, 16, 144).unwrap();

        assert_eq!(&data[..16], &[0xAB ^ 0xFF; 16][..]);
        assert_eq!(&data[16..160], &[0xAB; 144][..]);
        assert_eq!(&data[160..176], &[0xAB ^ 0xFF; 16][..]);
        assert_eq!(&data[176..], &[0xAB; 144][..]);

        session.close().unwrap();
        let frames = handle.join().unwrap();
        // One decrypt frame holding exactly two crypt blocks.
        assert_eq!(frames[2].len(), 32);
    }

    #[test]
    fn test_prefetch_key_sends_zero_content_id() {
        let (mut session, handle) = connect_pair();
        session.begin_key(0, "1613600188", PREFETCH_KEY_URI).unwrap();
        session.close().unwrap();
        let frames = handle.join().unwrap();
        assert_eq!(frames[0], b"0");
        assert_eq!(frames[1], PREFETCH_KEY_URI.as_bytes());
    }

    #[test]
    fn test_short_stripe_input_is_left_alone() {
        let (mut session, _handle) = connect_pair();
        let mut data = vec![0x11_u8; 8];
        // Shorter than one crypt block: nothing crosses the wire.
        session.decrypt_stripe(&mut data, 16, 144).unwrap();
        assert_eq!(data, vec![0x11; 8]);
    }
}
