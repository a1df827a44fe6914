//! STM32F103 Heating Pad Controller
//! =============================================================================================
//!
//! Date			Notes
//! 2025-10-09	    Initial release
//!
//!==============================================================================================
//!
//! This firmware implements a heating pad controller using:
//! - USART1 as the control link (AT text commands and Modbus RTU register access)
//! - NTC thermistor on ADC1 for pad temperature
//! - TIM1 PWM driving the heating element
//! - Software RTC driving 32 wall-clock alarms
//! - Key matrix plus a dedicated power key
//! - BT401 Bluetooth audio module on USART2 for the media keys
//!
//! Hardware Connections:
//!   Control link -> Blue Pill
//!      TX   -> PA9  (USART1_TX)
//!      RX   -> PA10 (USART1_RX)
//!
//!   Bluetooth module:
//!      RX   <- PA2  (USART2_TX)
//!
//!   Heater / sensor:
//!      NTC divider  -> PA0  (ADC1_IN0)
//!      Heater gate  -> PA11 (TIM1_CH4)
//!      Buzzer       -> PB9
//!
//!   Keypad:
//!      Rows -> PB12, PB13, PB14, PA8 (driven low one at a time)
//!      Cols -> PB5, PB6, PB7, PB8 (pull-up)
//!      Power key -> PB15 (pull-up)
//!
//! Features:
//! 1. Byte-stream demultiplexing into text and register frames
//! 2. PID temperature control at 10 Hz across three heat levels
//! 3. Shutoff timer with a per-second remaining-time countdown
//! 4. Alarm checks against the RTC every 10 s
//! 5. Onboard LED heartbeat indicator

#![no_std]
#![no_main]

use core::cell::RefCell;

use defmt::{info, warn};
use defmt_rtt as _; // Global logger
use embassy_executor::Spawner;
use embassy_stm32::{
    adc::{self, Adc},
    bind_interrupts,
    gpio::{Input, Level, Output, OutputType, Pull, Speed},
    mode::Blocking,
    peripherals::{self, ADC1, TIM1, USART1},
    time::khz,
    timer::simple_pwm::{PwmPin, SimplePwm, SimplePwmChannel},
    usart::{self, BufferedUart, BufferedUartRx, BufferedUartTx, UartTx},
};
use embassy_sync::{
    blocking_mutex::raw::ThreadModeRawMutex,
    channel::{Channel, Receiver},
    mutex::Mutex,
};
use embassy_time::{Ticker, Timer};
use embedded_io_async::{Read, Write};
use heapless::Vec;
use panic_probe as _; // Panic handler
use static_cell::StaticCell;

use heatpad::{
    alarm::{AlarmScheduler, run_alarm_checker},
    byte_queue::ByteQueue,
    command::CommandResponder,
    config::{BYTE_QUEUE_CAPACITY, Config},
    control::ControlSurface,
    demux::{FrameQueues, run_demux},
    hardware::{
        bt_module::AtBtModule,
        gpio_keys::{GpioKey, KeyMatrix},
        gpio_led::{GpioBuzzer, GpioLed},
        ntc::{NTC_SAMPLES, NtcParams, NtcSensor, SampleWindow},
        pwm_heater::PwmHeater,
        soft_rtc::SoftRtc,
        traits::{Led, SerialLink},
    },
    heat::HeatController,
    keypad::{Key, run_keypad},
    modbus::RegisterServer,
    pid::Pid,
    registers::RegisterTable,
};

type Raw = ThreadModeRawMutex;
type Surface = ControlSurface<'static, Raw, SoftRtc<Raw>>;
type Keys = (GpioKey<Input<'static>>, KeyMatrix<Output<'static>, Input<'static>, 4, 4>);

/// Largest chunk handed to the transmit task in one message.
const TX_CHUNK: usize = 100;

/// Name the Bluetooth module advertises.
const BT_NAME: &str = "HEATPAD";

const CONFIG: Config = Config::DEFAULT;

bind_interrupts!(struct Irqs {
    ADC1_2 => adc::InterruptHandler<ADC1>;
    USART1 => usart::BufferedInterruptHandler<USART1>;
});

// Shared controller state
static BYTES: ByteQueue<BYTE_QUEUE_CAPACITY> = ByteQueue::new();
static QUEUES: FrameQueues<Raw> = FrameQueues::new();
static REGISTERS: Mutex<Raw, RegisterTable> = Mutex::new(RegisterTable::new());
static HEAT: HeatController<Raw> = HeatController::new(CONFIG.lock_timeout);
static ALARMS: AlarmScheduler<Raw> = AlarmScheduler::new(CONFIG.lock_timeout);
static RTC: SoftRtc<Raw> = SoftRtc::new();
static SAMPLES: SampleWindow<Raw, NTC_SAMPLES> = SampleWindow::new();

// Replies waiting for the UART transmitter
static TX_CHANNEL: Channel<Raw, Vec<u8, TX_CHUNK>, 4> = Channel::new();

static TX_BUF: StaticCell<[u8; 256]> = StaticCell::new();
static RX_BUF: StaticCell<[u8; 256]> = StaticCell::new();

/// Serial link that queues replies for [`uart_tx`].
struct UartLink;

impl SerialLink for UartLink {
    fn send(&self, bytes: &[u8]) {
        for chunk in bytes.chunks(TX_CHUNK) {
            // Chunks never exceed the message capacity.
            let Ok(message) = Vec::from_slice(chunk) else {
                continue;
            };
            if TX_CHANNEL.try_send(message).is_err() {
                warn!("uart: tx queue full, {} bytes dropped", chunk.len());
            }
        }
    }
}

/// Transmit-only UART to the Bluetooth module.
struct BtUart(RefCell<UartTx<'static, Blocking>>);

impl SerialLink for BtUart {
    fn send(&self, bytes: &[u8]) {
        if let Err(e) = self.0.borrow_mut().blocking_write(bytes) {
            warn!("bt: tx error {}", e);
        }
    }
}

/// Main application entry point
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_stm32::init(Default::default());
    info!("heatpad: start");

    // Control link at 115200 8N1
    let mut uart_config = usart::Config::default();
    uart_config.baudrate = 115_200;
    let uart = BufferedUart::new(
        p.USART1,
        Irqs,
        p.PA10,
        p.PA9,
        TX_BUF.init([0; 256]),
        RX_BUF.init([0; 256]),
        uart_config,
    )
    .unwrap();
    let (tx, rx) = uart.split();

    // Bluetooth module at 115200 8N1, commands only
    let mut bt_config = usart::Config::default();
    bt_config.baudrate = 115_200;
    let bt_uart = UartTx::new_blocking(p.USART2, p.PA2, bt_config).unwrap();

    // Heater on TIM1 channel 4, 1 kHz
    let heater_pin = PwmPin::new_ch4(p.PA11, OutputType::PushPull);
    let pwm = SimplePwm::new(p.TIM1, None, None, None, Some(heater_pin), khz(1), Default::default());
    let mut heater = pwm.split().ch4;
    heater.enable();

    let adc = Adc::new(p.ADC1);

    let keys: Keys = (
        GpioKey::new(Input::new(p.PB15, Pull::Up), Key::Power),
        KeyMatrix::new(
            [
                Output::new(p.PB12, Level::High, Speed::Low),
                Output::new(p.PB13, Level::High, Speed::Low),
                Output::new(p.PB14, Level::High, Speed::Low),
                Output::new(p.PA8, Level::High, Speed::Low),
            ],
            [
                Input::new(p.PB5, Pull::Up),
                Input::new(p.PB6, Pull::Up),
                Input::new(p.PB7, Pull::Up),
                Input::new(p.PB8, Pull::Up),
            ],
            [
                [Some(Key::Min10), Some(Key::Min30), Some(Key::Min60), Some(Key::Heat)],
                [Some(Key::HeatPlus), Some(Key::HeatMinus), Some(Key::Shortcut1), Some(Key::Shortcut2)],
                [Some(Key::Music), Some(Key::Bluetooth), Some(Key::PlayPause), None],
                [Some(Key::Prev), Some(Key::Next), Some(Key::VolumeDown), Some(Key::VolumeUp)],
            ],
        ),
    );

    let buzzer = Output::new(p.PB9, Level::Low, Speed::Low);

    let surface: Surface =
        ControlSurface::new(&REGISTERS, &HEAT, &ALARMS, &RTC, CONFIG.lock_timeout);

    spawner.spawn(uart_rx(rx)).unwrap();
    spawner.spawn(uart_tx(tx, TX_CHANNEL.receiver())).unwrap();
    spawner.spawn(demux()).unwrap();
    spawner.spawn(rpc_server(surface)).unwrap();
    spawner.spawn(at_server(surface)).unwrap();
    spawner.spawn(ntc_sample(adc, p.PA0)).unwrap();
    spawner.spawn(heat_control(heater)).unwrap();
    spawner.spawn(shutoff_timer()).unwrap();
    spawner.spawn(remain_ticker()).unwrap();
    spawner.spawn(alarm_checker(buzzer)).unwrap();
    spawner.spawn(keypad(keys, surface, bt_uart)).unwrap();

    // Onboard LED (PC13) heartbeat
    let mut led = GpioLed::new(Output::new(p.PC13, Level::High, Speed::Low));
    let mut ticker = Ticker::every(embassy_time::Duration::from_millis(500));
    loop {
        led.toggle();
        ticker.next().await;
    }
}

/// UART Receive Task
///
/// Responsibilities:
/// 1. Drain the buffered receiver as bytes arrive
/// 2. Hand every byte to the byte queue for the demultiplexer
#[embassy_executor::task]
async fn uart_rx(mut rx: BufferedUartRx<'static>) {
    let mut buf = [0u8; 32];
    loop {
        match rx.read(&mut buf).await {
            Ok(n) => {
                for &byte in &buf[..n] {
                    if BYTES.write_from_interrupt(byte).is_err() {
                        warn!("uart: byte queue full");
                    }
                }
            }
            Err(e) => {
                warn!("uart: rx error {}", e);
                Timer::after_millis(10).await;
            }
        }
    }
}

/// UART Transmit Task
#[embassy_executor::task]
async fn uart_tx(
    mut tx: BufferedUartTx<'static>,
    messages: Receiver<'static, Raw, Vec<u8, TX_CHUNK>, 4>,
) {
    loop {
        let message = messages.receive().await;
        if let Err(e) = tx.write_all(&message).await {
            warn!("uart: tx error {}", e);
        }
    }
}

#[embassy_executor::task]
async fn demux() {
    run_demux(&BYTES, &QUEUES, CONFIG).await
}

#[embassy_executor::task]
async fn rpc_server(surface: Surface) {
    RegisterServer::new(surface)
        .serve(QUEUES.rpc.receiver(), &UartLink)
        .await
}

#[embassy_executor::task]
async fn at_server(surface: Surface) {
    CommandResponder::new(surface)
        .serve(QUEUES.text.receiver(), &UartLink)
        .await
}

/// NTC Sampling Task
///
/// Responsibilities:
/// 1. Convert the thermistor divider every 20 ms
/// 2. Keep the latest samples for the median filter
#[embassy_executor::task]
async fn ntc_sample(mut adc: Adc<'static, ADC1>, mut pin: peripherals::PA0) {
    let mut ticker = Ticker::every(embassy_time::Duration::from_millis(20));
    loop {
        SAMPLES.push(adc.read(&mut pin).await);
        ticker.next().await;
    }
}

/// Heating Control Task
///
/// Responsibilities:
/// 1. Apply pending timer messages to the heating state
/// 2. Run the PID against the NTC temperature at 10 Hz
/// 3. Keep the heater off whenever heating is stopped or the reading is implausible
#[embassy_executor::task]
async fn heat_control(channel: SimplePwmChannel<'static, TIM1>) {
    let sensor = NtcSensor::new(&SAMPLES, NtcParams::PAD, &CONFIG);
    HEAT.run_control(Pid::new(CONFIG.pid), sensor, PwmHeater::new(channel), CONFIG)
        .await
}

#[embassy_executor::task]
async fn shutoff_timer() {
    HEAT.run_shutoff_timer().await
}

#[embassy_executor::task]
async fn remain_ticker() {
    HEAT.run_remain_ticker(CONFIG.remain_tick).await
}

#[embassy_executor::task]
async fn alarm_checker(buzzer: Output<'static>) {
    let mut buzzer = GpioBuzzer::new(buzzer);
    run_alarm_checker(&ALARMS, &HEAT, &RTC, &mut buzzer, CONFIG).await
}

/// Keypad Task
///
/// Responsibilities:
/// 1. Configure the Bluetooth module once at start-up
/// 2. Scan the keys every 20 ms and apply completed presses
#[embassy_executor::task]
async fn keypad(keys: Keys, surface: Surface, bt_uart: UartTx<'static, Blocking>) {
    let mut bt = AtBtModule::new(BtUart(RefCell::new(bt_uart)));
    bt.start(BT_NAME).await;
    run_keypad(keys, surface, bt, CONFIG).await
}
