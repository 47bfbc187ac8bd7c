// ==========================================
// 抽签分配引擎 - GMPL 模型生成
// ==========================================
// 阶段一: 最小化最差秩次（max-min 公平）
// 阶段二: 在最差秩次上限 S 下最小化秩次总和
// ==========================================

/// 阶段一模型
const PHASE1_MODEL: &str = r#"# 阶段一: 最小化最差秩次
set C;
set V;

param p{c in C, v in V};

var x{c in C, v in V}, binary;
var z, integer;

minimize resultado: z;

s.t. worst_rank{c in C}:
    z >= sum{v in V} p[c,v] * x[c,v];

s.t. one_unit_per_family{c in C}:
    sum{v in V} x[c,v] = 1;

s.t. one_family_per_unit{v in V}:
    sum{c in C} x[c,v] = 1;

end;
"#;

/// 阶段二模型
const PHASE2_MODEL: &str = r#"# 阶段二: 秩次上限 S 下最小化秩次总和
set C;
set V;

param p{c in C, v in V};
param S;

var x{c in C, v in V}, binary;

minimize resultado: sum{c in C, v in V} p[c,v] * x[c,v];

s.t. rank_ceiling{c in C}:
    sum{v in V} p[c,v] * x[c,v] <= S;

s.t. one_unit_per_family{c in C}:
    sum{v in V} x[c,v] = 1;

s.t. one_family_per_unit{v in V}:
    sum{c in C} x[c,v] = 1;

end;
"#;

/// GMPL 模型生成器
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelGenerator;

impl ModelGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn phase1_model(&self) -> &'static str {
        PHASE1_MODEL
    }

    pub fn phase2_model(&self) -> &'static str {
        PHASE2_MODEL
    }
}
